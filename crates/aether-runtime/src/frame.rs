//! Per-frame camera and placement inputs, and the transforms derived from
//! them for the shading pass.

use glam::{DMat4, DVec3};

/// Camera state for one frame, in world space (m).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    pub view: DMat4,
    pub projection: DMat4,
}

impl Camera {
    pub fn view_projection(&self) -> DMat4 {
        self.projection * self.view
    }
}

/// What the host supplies every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub camera: Camera,
    /// Planet model transform. Object space is centred on the planet and
    /// measured in meters before the model's own scale.
    pub model: DMat4,
    /// Ephemeris time.
    pub time: f64,
    /// World position of the light source. The world origin when absent.
    pub light_source: Option<DVec3>,
}

impl FrameInput {
    /// World position of the planet centre.
    pub fn planet_position(&self) -> DVec3 {
        self.model.transform_point3(DVec3::ZERO)
    }

    pub fn sun_position(&self) -> DVec3 {
        self.light_source.unwrap_or(DVec3::ZERO)
    }
}

/// Matrices and object-space vectors the shading pass reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransforms {
    pub model: DMat4,
    pub inverse_model: DMat4,
    pub view_to_world: DMat4,
    /// Clip space straight to object space.
    pub projection_to_model: DMat4,
    pub camera_position_object: DVec3,
    /// Unit direction towards the sun, object space.
    pub sun_direction_object: DVec3,
}

impl FrameTransforms {
    /// With `sun_following_camera` the sun sits behind the viewer.
    pub fn new(frame: &FrameInput, sun_following_camera: bool) -> Self {
        let inverse_model = frame.model.inverse();
        let view_to_world = frame.camera.view.inverse();
        let inverse_projection = frame.camera.projection.inverse();
        let camera_position_object = inverse_model.transform_point3(frame.camera.position);
        let sun_object = if sun_following_camera {
            camera_position_object
        } else {
            inverse_model.transform_point3(frame.sun_position())
        };

        Self {
            model: frame.model,
            inverse_model,
            view_to_world,
            projection_to_model: inverse_model * view_to_world * inverse_projection,
            camera_position_object,
            sun_direction_object: sun_object.normalize_or_zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FrameInput {
        let eye = DVec3::new(0.0, 0.0, 2.0e7);
        FrameInput {
            camera: Camera {
                position: eye,
                view: DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y),
                projection: DMat4::perspective_rh(1.0, 1.5, 10.0, 1.0e9),
            },
            model: DMat4::from_translation(DVec3::new(1.0e8, 0.0, 0.0)),
            time: 0.0,
            light_source: Some(DVec3::new(2.0e8, 0.0, 0.0)),
        }
    }

    #[test]
    fn test_sun_direction_in_object_space() {
        let transforms = FrameTransforms::new(&frame(), false);
        assert!((transforms.sun_direction_object - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn test_sun_follows_camera() {
        let transforms = FrameTransforms::new(&frame(), true);
        let expected = (DVec3::new(-1.0e8, 0.0, 2.0e7)).normalize();
        assert!((transforms.sun_direction_object - expected).length() < 1e-12);
    }

    #[test]
    fn test_projection_to_model_inverts_pipeline() {
        let f = frame();
        let transforms = FrameTransforms::new(&f, false);
        let object_point = DVec3::new(-1.0e8, 1.0e6, 0.0);
        let clip = f.camera.projection * f.camera.view * f.model * object_point.extend(1.0);
        let back = transforms.projection_to_model * clip;
        let back = back.truncate() / back.w;
        assert!((back - object_point).length() < 10.0, "round trip off by {}", (back - object_point).length());
    }

    #[test]
    fn test_missing_light_source_uses_origin() {
        let f = FrameInput {
            light_source: None,
            ..frame()
        };
        let transforms = FrameTransforms::new(&f, false);
        assert!((transforms.sun_direction_object - DVec3::NEG_X).length() < 1e-12);
        assert_eq!(f.planet_position(), DVec3::new(1.0e8, 0.0, 0.0));
    }
}
