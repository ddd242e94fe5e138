//! Per-texel scattering math shared by every backend that runs on the CPU.
//!
//! Each `*_texel` function computes one output texel of one generation pass
//! from integer texel coordinates. The WGSL kernels in `aether-gpu` mirror
//! these functions one to one.

use std::f32::consts::PI;

use glam::{Vec3, Vec4};

use crate::params::GenerationSettings;
use crate::remap::{
    self, LayerGeometry, horizon_mu, irradiance_to_tex, mu_to_tex, optical_depth, r_to_tex,
    ray_distance_to_boundary, scattering_coords, tex_to_irradiance, tex_to_mu, tex_to_r,
    unmap_angles,
};
use crate::table::Table;

/// One generation pass. Names double as WGSL entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Transmittance,
    DirectIrradiance,
    SingleScattering,
    CopyIrradiance,
    CopyInscatter,
    ScatteringDensity,
    IndirectIrradiance,
    MultipleScattering,
    AccumulateIrradiance,
    AccumulateInscatter,
}

impl Kernel {
    pub const ALL: [Kernel; 10] = [
        Kernel::Transmittance,
        Kernel::DirectIrradiance,
        Kernel::SingleScattering,
        Kernel::CopyIrradiance,
        Kernel::CopyInscatter,
        Kernel::ScatteringDensity,
        Kernel::IndirectIrradiance,
        Kernel::MultipleScattering,
        Kernel::AccumulateIrradiance,
        Kernel::AccumulateInscatter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Transmittance => "transmittance",
            Kernel::DirectIrradiance => "direct_irradiance",
            Kernel::SingleScattering => "single_scattering",
            Kernel::CopyIrradiance => "copy_irradiance",
            Kernel::CopyInscatter => "copy_inscatter",
            Kernel::ScatteringDensity => "scattering_density",
            Kernel::IndirectIrradiance => "indirect_irradiance",
            Kernel::MultipleScattering => "multiple_scattering",
            Kernel::AccumulateIrradiance => "accumulate_irradiance",
            Kernel::AccumulateInscatter => "accumulate_inscatter",
        }
    }

    /// Whether the pass writes a 3D table one layer at a time.
    pub fn is_layered(self) -> bool {
        matches!(
            self,
            Kernel::SingleScattering
                | Kernel::CopyInscatter
                | Kernel::ScatteringDensity
                | Kernel::MultipleScattering
                | Kernel::AccumulateInscatter
        )
    }

    /// Number of tables written per texel.
    pub fn target_count(self) -> usize {
        match self {
            Kernel::SingleScattering => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of the previous scattering order.
///
/// Order 1 keeps Rayleigh and Mie apart so the phase functions can be applied
/// per component; later orders already carry their phase and share one table.
#[derive(Debug)]
pub enum ScatteringRef<'a, T> {
    Single { rayleigh: &'a T, mie: &'a T },
    Multiple(&'a T),
}

impl<T> Clone for ScatteringRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScatteringRef<'_, T> {}

impl<'a, T> ScatteringRef<'a, T> {
    pub fn is_single(&self) -> bool {
        matches!(self, ScatteringRef::Single { .. })
    }
}

/// Rayleigh phase function.
pub fn phase_rayleigh(nu: f32) -> f32 {
    3.0 / (16.0 * PI) * (1.0 + nu * nu)
}

/// Cornette-Shanks phase function with asymmetry `g`.
pub fn phase_mie(nu: f32, g: f32) -> f32 {
    let g2 = g * g;
    1.5 / (4.0 * PI) * (1.0 - g2) * (1.0 + g2 - 2.0 * g * nu).max(1e-6).powf(-1.5) * (1.0 + nu * nu)
        / (2.0 + g2)
}

/// Reconstruct Mie RGB from an inscattering texel whose alpha holds the Mie
/// red channel.
pub fn mie_from_inscatter(texel: Vec4, rayleigh_scattering: Vec3) -> Vec3 {
    let beta = rayleigh_scattering.max(Vec3::splat(1e-12));
    texel.truncate() * texel.w / texel.x.max(1e-4) * (beta.x / beta)
}

/// Table reads expressed in physical coordinates.
#[derive(Clone, Copy)]
pub struct Lookup<'a> {
    pub settings: &'a GenerationSettings,
}

impl<'a> Lookup<'a> {
    pub fn new(settings: &'a GenerationSettings) -> Self {
        Self { settings }
    }

    fn radii(&self) -> (f32, f32) {
        (
            self.settings.params.planet_radius,
            self.settings.params.atmosphere_radius,
        )
    }

    /// Transmittance from `(r, mu)` to the nearest boundary.
    pub fn transmittance(&self, table: &Table, r: f32, mu: f32) -> Vec3 {
        let (rg, rt) = self.radii();
        let extent = table.extent();
        let x = mu_to_tex(mu) * (extent.width - 1) as f32;
        let y = r_to_tex(r, rg, rt) * (extent.height - 1) as f32;
        table.sample_2d(x, y, 0).truncate()
    }

    /// Transmittance over the segment of length `d` starting at `(r, mu)`.
    ///
    /// Uses the ratio of two boundary transmittances, flipping the ray when it
    /// points downwards so both lookups stay above the horizon.
    pub fn transmittance_along(&self, table: &Table, r: f32, mu: f32, d: f32) -> Vec3 {
        let ri = (d * d + r * r + 2.0 * r * d * mu).max(0.0).sqrt();
        let mu_i = (d + r * mu) / ri.max(1e-6);
        let ratio = if mu > 0.0 {
            self.transmittance(table, r, mu)
                / self.transmittance(table, ri, mu_i).max(Vec3::splat(1e-30))
        } else {
            self.transmittance(table, ri, -mu_i)
                / self.transmittance(table, r, -mu).max(Vec3::splat(1e-30))
        };
        ratio.min(Vec3::ONE)
    }

    /// Ground or scattered irradiance at `(r, mu_s)`.
    pub fn irradiance(&self, table: &Table, r: f32, mu_s: f32) -> Vec3 {
        let (rg, rt) = self.radii();
        let extent = table.extent();
        let (u, v) = irradiance_to_tex(r, mu_s, rg, rt);
        table
            .sample_2d(u * (extent.width - 1) as f32, v * (extent.height - 1) as f32, 0)
            .truncate()
    }

    /// 4D lookup in an inscattering-shaped table.
    pub fn scattering(&self, table: &Table, r: f32, mu: f32, mu_s: f32, nu: f32) -> Vec4 {
        let (rg, rt) = self.radii();
        let counts = &self.settings.counts;
        let c = scattering_coords(r, mu, mu_s, nu, counts, rg, rt);
        let low = table.sample_3d(c.x_low, c.y, c.z);
        let high = table.sample_3d(c.x_low + counts.mu_s as f32, c.y, c.z);
        low.lerp(high, c.nu_weight)
    }

    /// Previous-order radiance arriving from direction `(mu, mu_s, nu)`.
    fn incoming(&self, source: ScatteringRef<'_, Table>, r: f32, mu: f32, mu_s: f32, nu: f32) -> Vec3 {
        match source {
            ScatteringRef::Single { rayleigh, mie } => {
                let g = self.settings.params.mie_phase_constant;
                self.scattering(rayleigh, r, mu, mu_s, nu).truncate() * phase_rayleigh(nu)
                    + self.scattering(mie, r, mu, mu_s, nu).truncate() * phase_mie(nu, g)
            }
            ScatteringRef::Multiple(table) => self.scattering(table, r, mu, mu_s, nu).truncate(),
        }
    }
}

/// Transmittance table texel: `exp(-sum of weighted optical depths)`.
pub fn transmittance_texel(settings: &GenerationSettings, x: u32, y: u32) -> Vec4 {
    let p = &settings.params;
    let counts = &settings.counts;
    let (rg, rt) = (p.planet_radius, p.atmosphere_radius);
    let steps = settings.steps.optical_depth;

    let r = tex_to_r(y as f32 / (counts.transmittance_height - 1) as f32, rg, rt);
    let mu = tex_to_mu(x as f32 / (counts.transmittance_width - 1) as f32);

    let mut depth = p.rayleigh_scattering * optical_depth(r, mu, p.rayleigh_height_scale, rt, rg, steps)
        + p.mie_extinction * optical_depth(r, mu, p.mie_height_scale, rt, rg, steps);
    if p.ozone_enabled {
        depth += p.ozone_extinction * optical_depth(r, mu, p.ozone_height_scale, rt, rg, steps);
    }
    (-depth).exp().extend(0.0)
}

fn irradiance_texel_coords(settings: &GenerationSettings, x: u32, y: u32) -> (f32, f32) {
    let p = &settings.params;
    let counts = &settings.counts;
    tex_to_irradiance(
        x as f32 / (counts.irradiance_width - 1) as f32,
        y as f32 / (counts.irradiance_height - 1) as f32,
        p.planet_radius,
        p.atmosphere_radius,
    )
}

/// Order-1 ground irradiance: direct sunlight only.
pub fn direct_irradiance_texel(settings: &GenerationSettings, transmittance: &Table, x: u32, y: u32) -> Vec4 {
    let (r, mu_s) = irradiance_texel_coords(settings, x, y);
    let lookup = Lookup::new(settings);
    (lookup.transmittance(transmittance, r, mu_s) * mu_s.max(0.0)).extend(0.0)
}

/// Rayleigh and Mie density-weighted light reaching the eye ray at distance `t`.
fn single_scattering_integrand(lookup: &Lookup<'_>, transmittance: &Table, r: f32, mu: f32, mu_s: f32, nu: f32, t: f32) -> (Vec3, Vec3) {
    let p = &lookup.settings.params;
    let rg = p.planet_radius;
    let ri = (r * r + t * t + 2.0 * r * mu * t).max(0.0).sqrt().max(rg);
    let mu_s_i = (nu * t + mu_s * r) / ri;

    if mu_s_i < horizon_mu(ri, rg) {
        return (Vec3::ZERO, Vec3::ZERO);
    }

    let attenuation = lookup.transmittance_along(transmittance, r, mu, t)
        * lookup.transmittance(transmittance, ri, mu_s_i);
    let height = ri - rg;
    let mut rayleigh_density = (-height / p.rayleigh_height_scale).exp();
    if p.ozone_enabled {
        rayleigh_density += (-height / p.ozone_height_scale).exp();
    }
    let mie_density = (-height / p.mie_height_scale).exp();
    (attenuation * rayleigh_density, attenuation * mie_density)
}

/// Order-1 inscattering, returned as `(rayleigh, mie)`.
pub fn single_scattering_texel(settings: &GenerationSettings, transmittance: &Table, geometry: &LayerGeometry, x: u32, y: u32) -> (Vec4, Vec4) {
    let p = &settings.params;
    let (rg, rt) = (p.planet_radius, p.atmosphere_radius);
    let (mu, mu_s, nu) = unmap_angles(x, y, geometry, &settings.counts, rg, rt);
    let r = geometry.r;
    let lookup = Lookup::new(settings);

    let steps = settings.steps.inscatter;
    let dx = ray_distance_to_boundary(r, mu, rt, rg) / steps as f32;
    let (mut prev_r, mut prev_m) = single_scattering_integrand(&lookup, transmittance, r, mu, mu_s, nu, 0.0);
    let mut rayleigh = Vec3::ZERO;
    let mut mie = Vec3::ZERO;
    for i in 1..=steps {
        let (cur_r, cur_m) = single_scattering_integrand(&lookup, transmittance, r, mu, mu_s, nu, i as f32 * dx);
        rayleigh += (prev_r + cur_r) * 0.5 * dx;
        mie += (prev_m + cur_m) * 0.5 * dx;
        prev_r = cur_r;
        prev_m = cur_m;
    }

    (
        (rayleigh * p.rayleigh_scattering).extend(0.0),
        (mie * p.mie_scattering).extend(0.0),
    )
}

/// Scattering source term `J`: previous-order radiance gathered over the full
/// sphere of incoming directions, plus light bounced off the ground.
pub fn scattering_density_texel(settings: &GenerationSettings, transmittance: &Table, delta_e: &Table, source: ScatteringRef<'_, Table>, geometry: &LayerGeometry, x: u32, y: u32) -> Vec4 {
    let p = &settings.params;
    let (rg, rt) = (p.planet_radius, p.atmosphere_radius);
    let (mu, mu_s, nu) = unmap_angles(x, y, geometry, &settings.counts, rg, rt);
    let lookup = Lookup::new(settings);

    let r = geometry.r.clamp(rg, rt);
    let mu = mu.clamp(-1.0, 1.0);
    let mu_s = mu_s.clamp(-1.0, 1.0);
    let spread = (1.0 - mu * mu).sqrt() * (1.0 - mu_s * mu_s).sqrt();
    let nu = nu.clamp(mu_s * mu - spread, mu_s * mu + spread);

    let cos_theta_min = horizon_mu(r, rg);
    let view = Vec3::new((1.0 - mu * mu).sqrt(), 0.0, mu);
    let sx = if view.x == 0.0 { 0.0 } else { (nu - mu_s * mu) / view.x };
    let sun = Vec3::new(sx, (1.0 - sx * sx - mu_s * mu_s).max(0.0).sqrt(), mu_s);

    let n = settings.steps.spherical;
    let d_theta = PI / n as f32;
    let d_phi = PI / n as f32;
    let height = r - rg;
    let rayleigh_density = p.rayleigh_scattering * (-height / p.rayleigh_height_scale).exp();
    let mie_density = p.mie_scattering * (-height / p.mie_height_scale).exp();
    let g = p.mie_phase_constant;

    let mut total = Vec3::ZERO;
    for i_theta in 0..n {
        let theta = (i_theta as f32 + 0.5) * d_theta;
        let cos_theta = theta.cos();

        let mut ground_reflectance = 0.0;
        let mut ground_distance = 0.0;
        let mut ground_transmittance = Vec3::ZERO;
        if cos_theta < cos_theta_min {
            ground_reflectance = p.average_ground_reflectance / PI;
            ground_distance =
                -r * cos_theta - (r * r * (cos_theta * cos_theta - 1.0) + rg * rg).max(0.0).sqrt();
            ground_transmittance = lookup.transmittance_along(
                transmittance,
                rg,
                -(r * cos_theta + ground_distance) / rg,
                ground_distance,
            );
        }

        for i_phi in 0..2 * n {
            let phi = (i_phi as f32 + 0.5) * d_phi;
            let dw = d_theta * d_phi * theta.sin();
            let w = Vec3::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), cos_theta);

            let nu_sun = sun.dot(w);
            let nu_view = view.dot(w);

            let ground_normal = (Vec3::new(0.0, 0.0, r) + ground_distance * w) / rg;
            let ground_irradiance = lookup.irradiance(delta_e, rg, ground_normal.dot(sun));
            let mut radiance = ground_reflectance * ground_irradiance * ground_transmittance;
            radiance += lookup.incoming(source, r, w.z, mu_s, nu_sun);

            total += radiance
                * (rayleigh_density * phase_rayleigh(nu_view) + mie_density * phase_mie(nu_view, g))
                * dw;
        }
    }
    total.extend(0.0)
}

/// Ground irradiance from the previous order's sky radiance.
pub fn indirect_irradiance_texel(settings: &GenerationSettings, source: ScatteringRef<'_, Table>, x: u32, y: u32) -> Vec4 {
    let (r, mu_s) = irradiance_texel_coords(settings, x, y);
    let lookup = Lookup::new(settings);
    let sun = Vec3::new((1.0 - mu_s * mu_s).max(0.0).sqrt(), 0.0, mu_s);

    let n = settings.steps.irradiance;
    let d_phi = PI / n as f32;
    let d_theta = PI / n as f32;

    let mut total = Vec3::ZERO;
    for i_phi in 0..2 * n {
        let phi = (i_phi as f32 + 0.5) * d_phi;
        for i_theta in 0..n / 2 {
            let theta = (i_theta as f32 + 0.5) * d_theta;
            let dw = d_theta * d_phi * theta.sin();
            let w = Vec3::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), theta.cos());
            let nu = sun.dot(w);
            total += lookup.incoming(source, r, w.z, mu_s, nu) * w.z * dw;
        }
    }
    total.extend(0.0)
}

/// Order-n inscattering: `J` integrated along the eye ray.
pub fn multiple_scattering_texel(settings: &GenerationSettings, transmittance: &Table, delta_j: &Table, geometry: &LayerGeometry, x: u32, y: u32) -> Vec4 {
    let p = &settings.params;
    let (rg, rt) = (p.planet_radius, p.atmosphere_radius);
    let (mu, mu_s, nu) = unmap_angles(x, y, geometry, &settings.counts, rg, rt);
    let r = geometry.r;
    let lookup = Lookup::new(settings);

    let integrand = |t: f32| {
        let ri = (r * r + t * t + 2.0 * r * mu * t).max(0.0).sqrt();
        let ri_safe = ri.max(1e-6);
        let mu_i = (r * mu + t) / ri_safe;
        let mu_s_i = (nu * t + mu_s * r) / ri_safe;
        lookup.scattering(delta_j, ri, mu_i, mu_s_i, nu).truncate()
            * lookup.transmittance_along(transmittance, r, mu, t)
    };

    let steps = settings.steps.inscatter;
    let dx = ray_distance_to_boundary(r, mu, rt, rg) / steps as f32;
    let mut previous = integrand(0.0);
    let mut total = Vec3::ZERO;
    for i in 1..=steps {
        let current = integrand(i as f32 * dx);
        total += (previous + current) * 0.5 * dx;
        previous = current;
    }
    total.extend(0.0)
}

/// Order-1 inscattering packed as Rayleigh RGB plus Mie red in alpha.
pub fn copy_inscatter_texel(rayleigh: Vec4, mie: Vec4) -> Vec4 {
    rayleigh.truncate().extend(mie.x)
}

/// Order-n inscattering contribution, with the Rayleigh phase divided out to
/// match the order-1 convention of the persistent table.
pub fn accumulate_inscatter_texel(settings: &GenerationSettings, delta_s: Vec4, geometry: &LayerGeometry, x: u32, y: u32) -> Vec4 {
    let p = &settings.params;
    let (_, _, nu) = remap::unmap_angles(x, y, geometry, &settings.counts, p.planet_radius, p.atmosphere_radius);
    (delta_s.truncate() / phase_rayleigh(nu)).extend(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PhysicalParameters;
    use crate::table::Extent;

    fn settings() -> GenerationSettings {
        GenerationSettings::new(PhysicalParameters::earth(), 0.25, 4).unwrap()
    }

    #[test]
    fn test_phase_functions_normalized() {
        // Both phase functions integrate to 1 over the sphere.
        let n = 2000;
        let g = 0.76;
        let (mut ray, mut mie) = (0.0_f64, 0.0_f64);
        for i in 0..n {
            let theta = (i as f64 + 0.5) / n as f64 * std::f64::consts::PI;
            let dw = 2.0 * std::f64::consts::PI * theta.sin() * std::f64::consts::PI / n as f64;
            let nu = theta.cos() as f32;
            ray += phase_rayleigh(nu) as f64 * dw;
            mie += phase_mie(nu, g) as f64 * dw;
        }
        assert!((ray - 1.0).abs() < 1e-3, "rayleigh integrates to {ray}");
        assert!((mie - 1.0).abs() < 2e-2, "mie integrates to {mie}");
    }

    #[test]
    fn test_mie_phase_peaks_forward() {
        assert!(phase_mie(1.0, 0.76) > phase_mie(0.0, 0.76) * 10.0);
        assert!((phase_mie(0.3, 0.0) - phase_mie(-0.3, 0.0)).abs() < 1e-6);
    }

    #[test]
    fn test_mie_reconstruction() {
        let beta_r = Vec3::new(5.8e-3, 1.35e-2, 3.31e-2);
        let texel = Vec4::new(0.2, 0.4, 0.8, 0.1);
        let mie = mie_from_inscatter(texel, beta_r);
        assert!((mie.x - 0.1).abs() < 1e-6, "red channel must equal alpha");
        assert!(mie.y < mie.x, "green mie scaled down by the rayleigh ratio");
    }

    #[test]
    fn test_transmittance_texels_in_unit_range() {
        let s = settings();
        let c = s.counts;
        for y in 0..c.transmittance_height {
            for x in 0..c.transmittance_width {
                let t = transmittance_texel(&s, x, y);
                for v in t.truncate().to_array() {
                    assert!((0.0..=1.0).contains(&v), "texel ({x},{y}) = {v}");
                }
            }
        }
    }

    #[test]
    fn test_copy_inscatter_packs_mie_red() {
        let packed = copy_inscatter_texel(Vec4::new(1.0, 2.0, 3.0, 0.0), Vec4::new(4.0, 5.0, 6.0, 0.0));
        assert_eq!(packed, Vec4::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_transmittance_along_unit_at_zero_length() {
        let s = settings();
        let c = s.counts;
        let mut table = Table::new(
            "transmittance",
            Extent::new_2d(c.transmittance_width, c.transmittance_height),
        );
        for y in 0..c.transmittance_height {
            for x in 0..c.transmittance_width {
                table.set(x, y, 0, transmittance_texel(&s, x, y));
            }
        }
        let lookup = Lookup::new(&s);
        for mu in [-0.5_f32, 0.1, 0.9] {
            let t = lookup.transmittance_along(&table, 6400.0, mu, 0.0);
            assert!((t - Vec3::ONE).abs().max_element() < 1e-3, "mu={mu}: {t}");
        }

        let near = lookup.transmittance_along(&table, 6400.0, 0.5, 5.0);
        let far = lookup.transmittance_along(&table, 6400.0, 0.5, 50.0);
        assert!(far.x <= near.x, "longer segment must transmit less");
    }

    #[test]
    fn test_kernel_layering() {
        assert!(Kernel::SingleScattering.is_layered());
        assert!(!Kernel::IndirectIrradiance.is_layered());
        assert_eq!(Kernel::SingleScattering.target_count(), 2);
        assert_eq!(Kernel::ALL.len(), 10);
        assert_eq!(Kernel::ScatteringDensity.to_string(), "scattering_density");
    }
}
