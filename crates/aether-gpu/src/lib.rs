//! wgpu backend for atmosphere table generation and the shading pass bindings.
//!
//! [`GpuExecutor`] runs the generation kernels as compute passes over
//! `Rgba32Float` storage textures. The WGSL in `shaders/` mirrors the Rust
//! math in `aether_scatter::kernels` and shares one remap module with the
//! shading pass.

pub mod context;
pub mod executor;
pub mod params;
pub mod shader;
pub mod shading;

pub use context::{GpuContext, GpuContextError, init_gpu_context_blocking};
pub use executor::{GpuError, GpuExecutor, GpuTable};
pub use params::KernelParams;
pub use shader::{ShaderError, ShaderLibrary, kernel_source, shading_source, validate_wgsl};
pub use shading::{ShadingPass, SHADING_TARGET_FORMAT};
