//! GPU uniform layout read by the atmosphere shading pass.
//!
//! Mirrors `ShadingUniform` / `ShadowUniform` in the WGSL shading module.
//! Shadow casters are bound as a fixed-size array of records indexed by slot.

use aether_scatter::GenerationSettings;
use bytemuck::{Pod, Zeroable};
use glam::DVec3;

use crate::frame::FrameTransforms;
use crate::shadow::{ShadowDescription, ShadowMode};

/// Slots in the shadow record array.
pub const MAX_SHADOW_CASTERS: usize = 4;

/// One eclipse shadow record.
///
/// Positions are relative to the planet centre so they stay accurate in f32.
///
/// Total size: 48 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadowUniform {
    /// Unit source-to-caster direction. (offset 0)
    pub source_to_caster: [f32; 3],
    /// 1 when this caster shadows the planet. (offset 12)
    pub is_shadowing: u32,
    /// Caster position relative to the planet centre (m). (offset 16)
    pub caster_position: [f32; 3],
    /// Scaled caster radius (m). (offset 28)
    pub caster_radius: f32,
    /// Penumbra cone apex distance behind the caster (m). (offset 32)
    pub penumbra: f32,
    /// Umbra cone length (m), 0 when unbounded. (offset 36)
    pub umbra: f32,
    /// Padding. (offset 40)
    pub _padding: [f32; 2],
}

static_assertions::assert_eq_size!(ShadowUniform, [u8; 48]);

impl ShadowUniform {
    pub fn from_description(shadow: &ShadowDescription, planet_position: DVec3) -> Self {
        if !shadow.is_shadowing {
            return Self::default();
        }
        Self {
            source_to_caster: shadow.source_to_caster.as_vec3().to_array(),
            is_shadowing: 1,
            caster_position: (shadow.caster_position - planet_position).as_vec3().to_array(),
            caster_radius: shadow.caster_radius as f32,
            penumbra: shadow.penumbra as f32,
            umbra: if shadow.umbra.is_finite() {
                shadow.umbra as f32
            } else {
                0.0
            },
            _padding: [0.0; 2],
        }
    }
}

/// Everything the shading pass reads besides the three tables.
///
/// Total size: 4×64 + 9×16 + 4×48 = 592 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadingUniform {
    /// Object to world. (offset 0)
    pub model: [[f32; 4]; 4],
    /// World to object. (offset 64)
    pub inverse_model: [[f32; 4]; 4],
    /// Eye to world. (offset 128)
    pub view_to_world: [[f32; 4]; 4],
    /// Clip space to object space. (offset 192)
    pub projection_to_model: [[f32; 4]; 4],
    /// Camera position, object space. (offset 256)
    pub camera_position: [f32; 3],
    /// Final blend factor of the atmosphere. (offset 268)
    pub opacity: f32,
    /// Unit direction to the sun, object space. (offset 272)
    pub sun_direction: [f32; 3],
    /// Apparent sun diameter (rad). (offset 284)
    pub sun_angular_size: f32,
    /// Rayleigh scattering (1/km). (offset 288)
    pub beta_rayleigh: [f32; 3],
    /// `HR` (km). (offset 300)
    pub rayleigh_height_scale: f32,
    /// Mie extinction (1/km). (offset 304)
    pub beta_mie_extinction: [f32; 3],
    /// `HM` (km). (offset 316)
    pub mie_height_scale: f32,
    /// Ozone extinction (1/km). (offset 320)
    pub beta_ozone_extinction: [f32; 3],
    /// `HO` (km). (offset 332)
    pub ozone_height_scale: f32,
    /// `Rg` (km). (offset 336)
    pub planet_radius: f32,
    /// `Rt` (km). (offset 340)
    pub atmosphere_radius: f32,
    /// (offset 344)
    pub ground_radiance_emission: f32,
    /// Mie `g`. (offset 348)
    pub mie_phase_constant: f32,
    /// (offset 352)
    pub sun_radiance: f32,
    /// (offset 356)
    pub ozone_enabled: u32,
    /// 1 when the whole pass can be skipped. (offset 360)
    pub cull_atmosphere: u32,
    /// (offset 364)
    pub hard_shadows: u32,
    /// Inscattering table axes: r, mu, mu_s, nu. (offset 368)
    pub samples: [u32; 4],
    /// Valid entries in `shadows`. (offset 384)
    pub shadow_count: u32,
    /// Padding to align `shadows`. (offset 388)
    pub _padding: [u32; 3],
    /// (offset 400)
    pub shadows: [ShadowUniform; MAX_SHADOW_CASTERS],
}

static_assertions::assert_eq_size!(ShadingUniform, [u8; 592]);

/// Per-frame shading state other than the physical constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameShading<'a> {
    pub transforms: &'a FrameTransforms,
    pub planet_position: DVec3,
    pub opacity: f32,
    pub shadow_mode: ShadowMode,
    pub culled: bool,
    pub shadows: &'a [ShadowDescription],
}

impl ShadingUniform {
    pub fn new(settings: &GenerationSettings, frame: &FrameShading<'_>) -> Self {
        let p = &settings.params;
        let counts = &settings.counts;
        let t = frame.transforms;

        let mut shadows = [ShadowUniform::default(); MAX_SHADOW_CASTERS];
        let shadow_count = frame.shadows.len().min(MAX_SHADOW_CASTERS);
        for (slot, shadow) in shadows.iter_mut().zip(frame.shadows) {
            *slot = ShadowUniform::from_description(shadow, frame.planet_position);
        }

        Self {
            model: t.model.as_mat4().to_cols_array_2d(),
            inverse_model: t.inverse_model.as_mat4().to_cols_array_2d(),
            view_to_world: t.view_to_world.as_mat4().to_cols_array_2d(),
            projection_to_model: t.projection_to_model.as_mat4().to_cols_array_2d(),
            camera_position: t.camera_position_object.as_vec3().to_array(),
            opacity: frame.opacity,
            sun_direction: t.sun_direction_object.as_vec3().to_array(),
            sun_angular_size: p.sun_angular_size,
            beta_rayleigh: p.rayleigh_scattering.to_array(),
            rayleigh_height_scale: p.rayleigh_height_scale,
            beta_mie_extinction: p.mie_extinction.to_array(),
            mie_height_scale: p.mie_height_scale,
            beta_ozone_extinction: p.ozone_extinction.to_array(),
            ozone_height_scale: p.ozone_height_scale,
            planet_radius: p.planet_radius,
            atmosphere_radius: p.atmosphere_radius,
            ground_radiance_emission: p.ground_radiance_emission,
            mie_phase_constant: p.mie_phase_constant,
            sun_radiance: p.sun_radiance,
            ozone_enabled: p.ozone_enabled as u32,
            cull_atmosphere: frame.culled as u32,
            hard_shadows: (frame.shadow_mode == ShadowMode::Hard) as u32,
            samples: [counts.r, counts.mu, counts.mu_s, counts.nu],
            shadow_count: shadow_count as u32,
            _padding: [0; 3],
            shadows,
        }
    }
}
