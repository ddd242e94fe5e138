//! Coordinate remapping between physical scattering parameters and table
//! coordinates, plus the closed-form ray geometry used by every pass.
//!
//! Conventions:
//! - `r` is the distance from the planet centre, `mu` the cosine of the view
//!   zenith angle, `mu_s` the cosine of the sun zenith angle and `nu` the
//!   cosine of the angle between view and sun directions.
//! - Texel `i` on an axis with `n` samples sits at normalized coordinate
//!   `i / (n - 1)`, so the first and last texels land exactly on the domain
//!   bounds. All lookups in this crate and in the WGSL kernels use this rule.

use crate::params::SampleCounts;

/// Optical depth returned for rays that dip below the local horizon.
pub const OPTICAL_DEPTH_SENTINEL: f32 = 1.0e9;

/// Lower bound of `mu` stored in the transmittance table.
pub const MU_MIN: f32 = -0.15;

/// `mu_s` range covered by the irradiance table.
pub const IRRADIANCE_MU_S_MIN: f32 = -0.2;
pub const IRRADIANCE_MU_S_SPAN: f32 = 1.2;

/// `mu` clamp applied below the horizon so ground rays never graze.
const HORIZON_MARGIN: f32 = 0.001;

/// Distance along `(r, mu)` to the nearer of the ground and the outer boundary.
///
/// The ground counts only when the intersection lies ahead of the ray.
pub fn ray_distance_to_boundary(r: f32, mu: f32, rt: f32, rg: f32) -> f32 {
    let r_mu = r * mu;
    let mut distance = -r_mu + (r_mu * r_mu + (rt - r) * (rt + r)).max(0.0).sqrt();

    let delta = r_mu * r_mu - (r - rg) * (r + rg);
    if delta >= 0.0 {
        let ground = -r * mu - delta.sqrt();
        if ground >= 0.0 {
            distance = distance.min(ground);
        }
    }
    distance
}

/// Cosine of the local horizon at radius `r` (negative).
pub fn horizon_mu(r: f32, rg: f32) -> f32 {
    -(1.0 - (rg * rg) / (r * r)).max(0.0).sqrt()
}

/// Trapezoid integral of `exp(-(h - Rg) / scale_height)` along `(r, mu)` up to
/// `distance`.
pub fn density_integral(r: f32, mu: f32, scale_height: f32, distance: f32, rg: f32, steps: u32) -> f32 {
    let steps = steps.max(1);
    let dx = distance / steps as f32;
    let density = |x: f32| {
        let h = (r * r + x * x + 2.0 * x * r * mu).max(0.0).sqrt();
        (-(h - rg) / scale_height).exp()
    };

    let mut previous = density(0.0);
    let mut acc = 0.0;
    for i in 1..=steps {
        let current = density(i as f32 * dx);
        acc += previous + current;
        previous = current;
    }
    acc * dx * 0.5
}

/// Optical depth of an exponential layer from `(r, mu)` to the nearest
/// boundary, or [`OPTICAL_DEPTH_SENTINEL`] below the horizon.
pub fn optical_depth(r: f32, mu: f32, scale_height: f32, rt: f32, rg: f32, steps: u32) -> f32 {
    if mu < horizon_mu(r, rg) {
        return OPTICAL_DEPTH_SENTINEL;
    }
    let distance = ray_distance_to_boundary(r, mu, rt, rg);
    density_integral(r, mu, scale_height, distance, rg, steps)
}

/// `u_r = sqrt((r - Rg) / (Rt - Rg))`, denser near the ground.
pub fn r_to_tex(r: f32, rg: f32, rt: f32) -> f32 {
    ((r - rg) / (rt - rg)).max(0.0).sqrt()
}

pub fn tex_to_r(u: f32, rg: f32, rt: f32) -> f32 {
    rg + u * u * (rt - rg)
}

const MU_TAN_SCALE: f32 = 1.5;

/// Tangent remap concentrating `mu` samples around the horizon.
pub fn mu_to_tex(mu: f32) -> f32 {
    ((mu - MU_MIN) / (1.0 - MU_MIN) * MU_TAN_SCALE.tan()).atan() / MU_TAN_SCALE
}

pub fn tex_to_mu(u: f32) -> f32 {
    MU_MIN + (u * MU_TAN_SCALE).tan() / MU_TAN_SCALE.tan() * (1.0 - MU_MIN)
}

/// Irradiance table coordinates `(u_mu_s, u_r)`, both linear.
pub fn irradiance_to_tex(r: f32, mu_s: f32, rg: f32, rt: f32) -> (f32, f32) {
    (
        (mu_s - IRRADIANCE_MU_S_MIN) / IRRADIANCE_MU_S_SPAN,
        (r - rg) / (rt - rg),
    )
}

pub fn tex_to_irradiance(u_mu_s: f32, u_r: f32, rg: f32, rt: f32) -> (f32, f32) {
    (
        rg + u_r * (rt - rg),
        IRRADIANCE_MU_S_MIN + u_mu_s * IRRADIANCE_MU_S_SPAN,
    )
}

/// Boundary distances shared by every texel of one 3D table layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerGeometry {
    /// Depth index in the 3D tables.
    pub index: u32,
    /// Altitude assigned to the layer.
    pub r: f32,
    /// Shortest distance to the top of the atmosphere (`Rt - r`).
    pub dmin_top: f32,
    /// Longest distance to the top, through the horizon.
    pub dmax_top: f32,
    /// Shortest distance to the ground (`r - Rg`).
    pub dmin_ground: f32,
    /// Distance to the horizon.
    pub horizon: f32,
}

impl LayerGeometry {
    /// Packed as `(dmin_top, dmax_top, dmin_ground, horizon)` for GPU upload.
    pub fn distances(&self) -> [f32; 4] {
        [self.dmin_top, self.dmax_top, self.dmin_ground, self.horizon]
    }
}

const BOTTOM_LAYER_BIAS: f32 = 0.01;
const TOP_LAYER_BIAS: f32 = -0.001;

/// Altitude and boundary distances of layer `layer` out of `r_samples`.
///
/// Layers are spaced uniformly in horizon distance, which puts more of them
/// near the ground. The first and last layers are nudged inside the shell so
/// no integration runs over a zero-length ray.
pub fn layer_to_height(layer: u32, r_samples: u32, rg: f32, rt: f32) -> LayerGeometry {
    let fraction = layer as f32 / (r_samples.max(2) - 1) as f32;
    let bias = if layer == 0 {
        BOTTOM_LAYER_BIAS
    } else if layer + 1 == r_samples {
        TOP_LAYER_BIAS
    } else {
        0.0
    };

    let span = ((rt - rg) * (rt + rg)).sqrt();
    let r = (rg * rg + fraction * fraction * span * span).sqrt() + bias;
    let horizon = ((r - rg) * (r + rg)).max(0.0).sqrt();
    LayerGeometry {
        index: layer,
        r,
        dmin_top: rt - r,
        dmax_top: horizon + span,
        dmin_ground: r - rg,
        horizon,
    }
}

/// Sun-angle tangent remap constants.
const MU_S_TAN_SCALE: f32 = 1.1;
const MU_S_OFFSET: f32 = 0.26;
const MU_S_MIN: f32 = -0.1975;

fn mu_s_tan_range() -> f32 {
    ((1.0 + MU_S_OFFSET) * MU_S_TAN_SCALE).tan()
}

/// Recover `(mu, mu_s, nu)` for texel `(x, y)` of a 3D table layer.
///
/// The lower half of the `mu` axis holds rays that hit the ground, the upper
/// half rays that escape through the top; both halves are parameterised by
/// distance to the respective boundary.
pub fn unmap_angles(x: u32, y: u32, geometry: &LayerGeometry, counts: &SampleCounts, rg: f32, rt: f32) -> (f32, f32, f32) {
    let r = geometry.r;
    let half = (counts.mu / 2) as f32;
    let y = y as f32;

    let mu = if y < half {
        let d = 1.0 - y / (half - 1.0);
        let d = (d * geometry.horizon)
            .max(geometry.dmin_ground)
            .min(geometry.horizon * 0.999);
        let mu = -((r - rg) * (r + rg) + d * d) / (2.0 * r * d);
        mu.min(horizon_mu(r, rg) - HORIZON_MARGIN)
    } else {
        let d = (y - half) / (half - 1.0);
        let d = (d * geometry.dmax_top)
            .max(geometry.dmin_top)
            .min(geometry.dmax_top * 0.999);
        ((rt - r) * (rt + r) - d * d) / (2.0 * r * d)
    };
    let mu = mu.clamp(-1.0, 1.0);

    let slab = x / counts.mu_s;
    let u_mu_s = (x % counts.mu_s) as f32 / (counts.mu_s - 1) as f32;
    let mu_s = ((2.0 * u_mu_s - 1.0 + MU_S_OFFSET) * MU_S_TAN_SCALE).tan() / mu_s_tan_range();
    let nu = -1.0 + slab as f32 / (counts.nu - 1) as f32 * 2.0;

    (mu, mu_s, nu)
}

/// Fractional texel position of `(r, mu, mu_s, nu)` in a 3D table.
///
/// `nu` spans two slabs: sample `x_low` and `x_low + mu_s` count, then blend
/// with `nu_weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringCoords {
    /// Column inside the lower `nu` slab.
    pub x_low: f32,
    /// Row (view-angle axis).
    pub y: f32,
    /// Layer (altitude axis).
    pub z: f32,
    /// Blend towards the next slab, in [0, 1].
    pub nu_weight: f32,
}

/// Forward of [`layer_to_height`] and [`unmap_angles`].
pub fn scattering_coords(r: f32, mu: f32, mu_s: f32, nu: f32, counts: &SampleCounts, rg: f32, rt: f32) -> ScatteringCoords {
    let r = r.clamp(rg, rt);
    // Differences of squares are factored to keep f32 precision at planetary radii.
    let h = ((rt - rg) * (rt + rg)).sqrt();
    let rho = ((r - rg) * (r + rg)).max(0.0).sqrt();
    let z = rho / h * (counts.r - 1) as f32;

    let half = (counts.mu / 2) as f32;
    let r_mu = r * mu;
    let delta = r_mu * r_mu - rho * rho;
    let y = if r_mu < 0.0 && delta > 0.0 {
        let d = -r_mu - delta.sqrt();
        let t = if rho > 0.0 { (1.0 - d / rho).clamp(0.0, 1.0) } else { 0.0 };
        t * (half - 1.0)
    } else {
        let d = -r_mu + (delta + h * h).max(0.0).sqrt();
        let t = (d / (rho + h)).clamp(0.0, 1.0);
        half + t * (half - 1.0)
    };

    let u_mu_s = ((mu_s.max(MU_S_MIN) * mu_s_tan_range()).atan() / MU_S_TAN_SCALE + 1.0
        - MU_S_OFFSET)
        * 0.5;
    let mu_s_index = u_mu_s.clamp(0.0, 1.0) * (counts.mu_s - 1) as f32;

    let nu_pos = ((nu + 1.0) * 0.5).clamp(0.0, 1.0) * (counts.nu - 1) as f32;
    let slab = nu_pos.floor().min((counts.nu - 2) as f32);

    ScatteringCoords {
        x_low: slab * counts.mu_s as f32 + mu_s_index,
        y,
        z,
        nu_weight: nu_pos - slab,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RG: f32 = 6371.0;
    const RT: f32 = 6471.0;

    #[test]
    fn test_ray_distance_bounds() {
        for ri in 0..=20 {
            let r = RG + (RT - RG) * ri as f32 / 20.0;
            for mi in 0..=40 {
                let mu = -1.0 + 2.0 * mi as f32 / 40.0;
                let d = ray_distance_to_boundary(r, mu, RT, RG);
                assert!(
                    d >= 0.0 && d <= 2.0 * RT * (1.0 + 1e-6),
                    "distance {d} out of range at r={r}, mu={mu}"
                );
            }
        }
    }

    #[test]
    fn test_ray_distance_vertical() {
        let up = ray_distance_to_boundary(RG, 1.0, RT, RG);
        assert!((up - (RT - RG)).abs() < 1e-2, "zenith ray length {up}");

        let down = ray_distance_to_boundary(RG + 50.0, -1.0, RT, RG);
        assert!((down - 50.0).abs() < 1e-2, "nadir ray should hit ground, got {down}");
    }

    #[test]
    fn test_ray_from_top_grazing_escapes() {
        // Just above the horizon the ray must reach the outer boundary, not the ground.
        let r = RG + 10.0;
        let mu = horizon_mu(r, RG) + 0.01;
        let d = ray_distance_to_boundary(r, mu, RT, RG);
        let ground_hit = ray_distance_to_boundary(r, horizon_mu(r, RG) - 0.01, RT, RG);
        assert!(d > ground_hit, "escaping ray {d} vs ground ray {ground_hit}");
    }

    #[test]
    fn test_optical_depth_below_horizon_is_sentinel() {
        let r = RG + 1.0;
        let mu = horizon_mu(r, RG) - 0.01;
        assert_eq!(optical_depth(r, mu, 8.0, RT, RG, 500), OPTICAL_DEPTH_SENTINEL);
    }

    #[test]
    fn test_optical_depth_vertical_matches_analytic() {
        let h = 8.0;
        let od = optical_depth(RG, 1.0, h, RT, RG, 500);
        let analytic = h * (1.0 - (-(RT - RG) / h).exp());
        assert!(
            (od - analytic).abs() / analytic < 1e-3,
            "vertical optical depth {od} vs analytic {analytic}"
        );
    }

    #[test]
    fn test_optical_depth_grows_with_ray_length() {
        for r in [RG, RG + 5.0, RG + 40.0, RT - 1.0] {
            let full = ray_distance_to_boundary(r, 0.3, RT, RG);
            let mut previous = 0.0;
            for i in 1..=10 {
                let od = density_integral(r, 0.3, 8.0, full * i as f32 / 10.0, RG, 500);
                assert!(od >= 0.0);
                assert!(od >= previous, "optical depth shrank at r={r}, step {i}");
                previous = od;
            }

            // Tilting towards the horizon lengthens the ray and the depth.
            let mut previous = 0.0;
            let horizon = horizon_mu(r, RG);
            for i in 0..=10 {
                let mu = 1.0 - (1.0 - horizon) * i as f32 / 10.0 + 1e-3;
                let od = optical_depth(r, mu.min(1.0), 8.0, RT, RG, 500);
                assert!(od >= previous * (1.0 - 1e-4), "depth decreased at r={r}, mu={mu}");
                previous = od;
            }
        }
    }

    #[test]
    fn test_mu_round_trip() {
        for i in 0..=100 {
            let u = i as f32 / 100.0;
            let back = mu_to_tex(tex_to_mu(u));
            assert!((back - u).abs() < 1e-5, "u={u} round-tripped to {back}");
        }
        assert!((tex_to_mu(0.0) - MU_MIN).abs() < 1e-6);
        assert!((tex_to_mu(1.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_r_round_trip() {
        for i in 0..=100 {
            let u = i as f32 / 100.0;
            let back = r_to_tex(tex_to_r(u, RG, RT), RG, RT);
            assert!((back - u).abs() < 1e-3, "u={u} round-tripped to {back}");
        }
    }

    #[test]
    fn test_irradiance_round_trip() {
        let (r, mu_s) = tex_to_irradiance(0.25, 0.75, RG, RT);
        let (u_mu_s, u_r) = irradiance_to_tex(r, mu_s, RG, RT);
        assert!((u_mu_s - 0.25).abs() < 1e-5);
        assert!((u_r - 0.75).abs() < 1e-3);
    }

    #[test]
    fn test_layer_bias_keeps_layers_inside_shell() {
        let bottom = layer_to_height(0, 32, RG, RT);
        let top = layer_to_height(31, 32, RG, RT);
        assert!(bottom.r > RG && bottom.dmin_ground > 0.0);
        assert!(top.r < RT && top.dmin_top > 0.0);

        let mut previous = bottom.r;
        for layer in 1..32 {
            let geometry = layer_to_height(layer, 32, RG, RT);
            assert!(geometry.r > previous, "layers must climb monotonically");
            previous = geometry.r;
        }
    }

    #[test]
    fn test_unmap_angles_split_between_ground_and_sky() {
        let counts = SampleCounts::default();
        let geometry = layer_to_height(10, counts.r, RG, RT);
        let horizon = horizon_mu(geometry.r, RG);

        for y in 0..counts.mu {
            let (mu, _, _) = unmap_angles(0, y, &geometry, &counts, RG, RT);
            assert!((-1.0..=1.0).contains(&mu), "mu {mu} at row {y}");
            if y < counts.mu / 2 {
                assert!(mu < horizon, "row {y} should hit the ground");
            } else {
                assert!(mu >= horizon - 1e-4, "row {y} should reach the sky");
            }
        }
    }

    #[test]
    fn test_unmap_angles_nu_and_mu_s_ranges() {
        let counts = SampleCounts::default();
        let geometry = layer_to_height(5, counts.r, RG, RT);

        let (_, mu_s_first, nu_first) = unmap_angles(0, 70, &geometry, &counts, RG, RT);
        let last = counts.scattering_width() - 1;
        let (_, mu_s_last, nu_last) = unmap_angles(last, 70, &geometry, &counts, RG, RT);

        assert!((nu_first + 1.0).abs() < 1e-6);
        assert!((nu_last - 1.0).abs() < 1e-6);
        assert!((mu_s_last - 1.0).abs() < 1e-5, "top mu_s {mu_s_last}");
        assert!(mu_s_first < -0.19 && mu_s_first > -0.2, "bottom mu_s {mu_s_first}");
    }

    #[test]
    fn test_scattering_coords_invert_unmap() {
        let counts = SampleCounts::default();
        for layer in [3_u32, 17, 28] {
            let geometry = layer_to_height(layer, counts.r, RG, RT);
            // Rows away from the clamped ends of either half.
            for (x, y) in [(5_u32, 30_u32), (37, 40), (100, 70), (200, 120), (255, 90)] {
                let (mu, mu_s, nu) = unmap_angles(x, y, &geometry, &counts, RG, RT);
                let c = scattering_coords(geometry.r, mu, mu_s, nu, &counts, RG, RT);

                assert!((c.z - layer as f32).abs() < 0.05, "layer {layer} -> {}", c.z);
                assert!((c.y - y as f32).abs() < 0.05, "row {y} -> {} (layer {layer})", c.y);

                let column = c.x_low + c.nu_weight * counts.mu_s as f32;
                assert!(
                    (column - x as f32).abs() < 0.05,
                    "column {x} -> {column} (layer {layer})"
                );
            }
        }
    }
}
