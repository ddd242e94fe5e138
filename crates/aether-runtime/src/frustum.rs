//! Frustum and distance culling of the atmosphere shell.
//!
//! Works in f64 world space: planet positions are far too large for f32
//! plane tests.

use glam::{DMat4, DVec3, DVec4};

/// Margin added to the shell radius before the plane tests (m).
pub const CULL_MARGIN: f64 = 2000.0;

/// Beyond this many shell radii the atmosphere is culled without a plane test.
pub const DISTANCE_CULL_RADII: f64 = 5000.0;

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;

/// Five inward-pointing planes of a view frustum. The far plane is left out:
/// an atmosphere beyond the far plane still colours the sky.
#[derive(Clone, Debug)]
pub struct ShellFrustum {
    planes: [DVec4; 5],
}

impl ShellFrustum {
    /// Griggs-Hartmann extraction from a combined view-projection matrix.
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [DVec4::ZERO; 5];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[3] + rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Whether a sphere reaches inside every plane.
    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// Scaled atmosphere shell placed in the world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShellBounds {
    /// World-space centre of the planet (m).
    pub center: DVec3,
    /// Outer atmosphere radius after the model scale (m).
    pub radius: f64,
}

impl ShellBounds {
    /// Shell of outer radius `atmosphere_radius_km` under `model`.
    pub fn from_model(model: &DMat4, atmosphere_radius_km: f64) -> Self {
        let center = model.transform_point3(DVec3::ZERO);
        let radius = model
            .transform_vector3(DVec3::new(atmosphere_radius_km * 1000.0, 0.0, 0.0))
            .length();
        Self { center, radius }
    }
}

/// Whether the atmosphere can be skipped this frame.
///
/// The shell is culled when the camera is more than
/// [`DISTANCE_CULL_RADII`] radii away, or when the shell grown by
/// [`CULL_MARGIN`] lies fully outside one of the frustum planes. A camera
/// inside the shell never culls it.
pub fn cull_atmosphere(view_projection: &DMat4, camera_position: DVec3, shell: &ShellBounds) -> bool {
    let distance = camera_position.distance(shell.center);
    if distance <= shell.radius {
        return false;
    }
    if distance > shell.radius * DISTANCE_CULL_RADII {
        return true;
    }
    !ShellFrustum::from_view_projection(view_projection)
        .intersects_sphere(shell.center, shell.radius + CULL_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL_RADIUS: f64 = 6_471_000.0;

    fn camera_vp(eye: DVec3, dir: DVec3) -> DMat4 {
        let view = DMat4::look_to_rh(eye, dir, DVec3::Y);
        let proj = DMat4::perspective_rh(std::f64::consts::FRAC_PI_4, 16.0 / 9.0, 1.0, 1.0e12);
        proj * view
    }

    fn shell_at(center: DVec3) -> ShellBounds {
        ShellBounds {
            center,
            radius: SHELL_RADIUS,
        }
    }

    #[test]
    fn test_planet_ahead_is_visible() {
        let eye = DVec3::ZERO;
        let vp = camera_vp(eye, DVec3::NEG_Z);
        let shell = shell_at(DVec3::new(0.0, 0.0, -3.0e7));
        assert!(!cull_atmosphere(&vp, eye, &shell));
    }

    #[test]
    fn test_planet_behind_camera_is_culled() {
        let eye = DVec3::ZERO;
        let vp = camera_vp(eye, DVec3::NEG_Z);
        let shell = shell_at(DVec3::new(0.0, 0.0, 3.0e7));
        assert!(cull_atmosphere(&vp, eye, &shell));
    }

    #[test]
    fn test_planet_far_to_the_side_is_culled() {
        let eye = DVec3::ZERO;
        let vp = camera_vp(eye, DVec3::NEG_Z);
        let shell = shell_at(DVec3::new(4.0e8, 0.0, -3.0e7));
        assert!(cull_atmosphere(&vp, eye, &shell));
    }

    #[test]
    fn test_partially_visible_planet_is_kept() {
        let eye = DVec3::ZERO;
        let vp = camera_vp(eye, DVec3::NEG_Z);
        // Centre just outside the left plane, shell still reaching in.
        let shell = shell_at(DVec3::new(-1.7e7, 0.0, -2.0e7));
        assert!(!cull_atmosphere(&vp, eye, &shell));
    }

    #[test]
    fn test_distant_planet_is_culled_even_in_view() {
        let eye = DVec3::ZERO;
        let vp = camera_vp(eye, DVec3::NEG_Z);
        let shell = shell_at(DVec3::new(0.0, 0.0, -SHELL_RADIUS * (DISTANCE_CULL_RADII + 1.0)));
        assert!(cull_atmosphere(&vp, eye, &shell));
    }

    #[test]
    fn test_camera_inside_shell_never_culled() {
        let shell = shell_at(DVec3::new(1.0e9, 2.0e9, -5.0e8));
        let eye = shell.center + DVec3::new(6_380_000.0, 0.0, 0.0);
        for dir in [DVec3::X, DVec3::NEG_X, DVec3::Z, DVec3::NEG_Z] {
            let vp = camera_vp(eye, dir);
            assert!(!cull_atmosphere(&vp, eye, &shell), "culled looking along {dir}");
        }
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = ShellFrustum::from_view_projection(&camera_vp(DVec3::ZERO, DVec3::NEG_Z));
        for plane in &frustum.planes {
            let len = plane.truncate().length();
            assert!((len - 1.0).abs() < 1e-9, "plane normal not normalized: {len}");
        }
    }

    #[test]
    fn test_shell_bounds_follow_model_scale() {
        let model = DMat4::from_scale_rotation_translation(
            DVec3::splat(2.0),
            glam::DQuat::IDENTITY,
            DVec3::new(10.0, 20.0, 30.0),
        );
        let shell = ShellBounds::from_model(&model, 6471.0);
        assert_eq!(shell.center, DVec3::new(10.0, 20.0, 30.0));
        assert!((shell.radius - 2.0 * SHELL_RADIUS).abs() < 1e-3);
    }
}
