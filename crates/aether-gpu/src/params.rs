//! Parameter block shared by every generation kernel.

use aether_scatter::{GenerationSettings, LayerGeometry};
use bytemuck::{Pod, Zeroable};

/// Mirrors `KernelParams` in `kernel_common.wgsl`.
///
/// Total size: 144 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    /// `Rg` (km). (offset 0)
    pub planet_radius: f32,
    /// `Rt` (km). (offset 4)
    pub atmosphere_radius: f32,
    /// (offset 8)
    pub rayleigh_height_scale: f32,
    /// (offset 12)
    pub mie_height_scale: f32,
    /// (offset 16)
    pub rayleigh_scattering: [f32; 3],
    /// (offset 28)
    pub ozone_height_scale: f32,
    /// (offset 32)
    pub mie_scattering: [f32; 3],
    /// (offset 44)
    pub mie_phase_constant: f32,
    /// (offset 48)
    pub mie_extinction: [f32; 3],
    /// (offset 60)
    pub average_ground_reflectance: f32,
    /// (offset 64)
    pub ozone_extinction: [f32; 3],
    /// (offset 76)
    pub ozone_enabled: u32,
    /// Inscattering axes: r, mu, mu_s, nu. (offset 80)
    pub samples: [u32; 4],
    /// Optical depth, inscatter, spherical and irradiance steps. (offset 96)
    pub steps: [u32; 4],
    /// Altitude of the layer being written. (offset 112)
    pub layer_r: f32,
    /// (offset 116)
    pub dmin_top: f32,
    /// (offset 120)
    pub dmax_top: f32,
    /// (offset 124)
    pub dmin_ground: f32,
    /// (offset 128)
    pub horizon: f32,
    /// Depth index written by layered kernels. (offset 132)
    pub layer_index: u32,
    /// 1 when the scattering source is split into Rayleigh and Mie. (offset 136)
    pub first_order: u32,
    /// Padding. (offset 140)
    pub _padding: u32,
}

static_assertions::assert_eq_size!(KernelParams, [u8; 144]);

impl KernelParams {
    pub fn new(settings: &GenerationSettings, layer: Option<&LayerGeometry>, first_order: bool) -> Self {
        let p = &settings.params;
        let c = &settings.counts;
        let s = &settings.steps;
        let mut params = Self {
            planet_radius: p.planet_radius,
            atmosphere_radius: p.atmosphere_radius,
            rayleigh_height_scale: p.rayleigh_height_scale,
            mie_height_scale: p.mie_height_scale,
            rayleigh_scattering: p.rayleigh_scattering.to_array(),
            ozone_height_scale: p.ozone_height_scale,
            mie_scattering: p.mie_scattering.to_array(),
            mie_phase_constant: p.mie_phase_constant,
            mie_extinction: p.mie_extinction.to_array(),
            average_ground_reflectance: p.average_ground_reflectance,
            ozone_extinction: p.ozone_extinction.to_array(),
            ozone_enabled: p.ozone_enabled as u32,
            samples: [c.r, c.mu, c.mu_s, c.nu],
            steps: [s.optical_depth, s.inscatter, s.spherical, s.irradiance],
            first_order: first_order as u32,
            ..Self::default()
        };
        if let Some(layer) = layer {
            params.layer_r = layer.r;
            [params.dmin_top, params.dmax_top, params.dmin_ground, params.horizon] = layer.distances();
            params.layer_index = layer.index;
        }
        params
    }
}
