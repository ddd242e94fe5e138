//! Precomputed atmospheric scattering tables.
//!
//! Implements the Bruneton & Neyret precomputation: a transmittance table, a
//! ground irradiance table and a 4D inscattering table packed into 3D, built
//! by a fixed chain of passes with multiple scattering orders accumulated
//! iteratively.
//!
//! The pass chain lives in [`TableGenerator`] and is written against the
//! [`GridExecutor`] capability. [`CpuExecutor`] runs the per-texel math from
//! [`kernels`] on the rayon pool; `aether-gpu` provides a wgpu backend.

pub mod cpu;
pub mod executor;
pub mod generator;
pub mod kernels;
pub mod params;
pub mod ppm;
pub mod remap;
pub mod store;
pub mod table;

pub use cpu::{CpuError, CpuExecutor};
pub use executor::{Blend, GridExecutor, Inputs, Pass};
pub use generator::{DumpOptions, GenerateError, TableGenerator};
pub use kernels::{Kernel, Lookup, ScatteringRef, mie_from_inscatter, phase_mie, phase_rayleigh};
pub use params::{
    DEFAULT_SCATTERING_ORDERS, GenerationSettings, IntegrationSteps, ParameterError,
    PhysicalParameters, SampleCounts,
};
pub use ppm::{DumpError, PpmFormat, save_ppm, write_ppm};
pub use remap::LayerGeometry;
pub use store::{GeneratedTables, PublishedTables, TableStore};
pub use table::{Extent, Table};
