//! Runtime side of the atmosphere: everything computed once per frame before
//! the shading pass.
//!
//! An [`Atmosphere`] owns the table store, regenerates tables when its
//! settings change, and turns camera, placement and ephemeris state into a
//! [`ShadingUniform`] plus a cull decision.

pub mod atmosphere;
pub mod frame;
pub mod frustum;
pub mod settings;
pub mod shadow;
pub mod uniforms;

pub use atmosphere::{Atmosphere, AtmosphereError, PreparedFrame};
pub use frame::{Camera, FrameInput, FrameTransforms};
pub use frustum::{CULL_MARGIN, DISTANCE_CULL_RADII, ShellBounds, ShellFrustum, cull_atmosphere};
pub use settings::{AtmosphereSettings, SettingsError, physical_parameters};
pub use shadow::{
    Body, DEFAULT_REFERENCE_FRAME, Ephemeris, ShadowCasterConfiguration, ShadowDescription,
    ShadowMode, ShadowResolver, ShadowScene, classify, eclipse_shadow,
};
pub use uniforms::{FrameShading, MAX_SHADOW_CASTERS, ShadingUniform, ShadowUniform};
