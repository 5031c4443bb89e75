use crate::calibration::CalibrationTransform;
use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Euler angles in degrees handed to the render consumer.
///
/// Serializes as `{"x":..,"y":..,"z":..}`, one JSON object per line on the
/// sink sockets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Orientation {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Rotation for these angles, applied Z first, then X, then Y.
    pub fn to_rotation(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.y.to_radians(),
            self.x.to_radians(),
            self.z.to_radians(),
        )
    }

    /// One smoothing step of a consumer that eases `current` towards this
    /// orientation at `rate` per second.
    pub fn slerp_towards(&self, current: Quat, rate: f32, dt: f32) -> Quat {
        current.slerp(self.to_rotation(), (rate * dt).clamp(0.0, 1.0))
    }
}

/// Correct a raw sample and project it onto the single tilt axis the
/// consumer renders: `(0, 0, -rotated.y)`.
pub fn apply(transform: &CalibrationTransform, raw: Vec3) -> Orientation {
    let rotated = transform.apply(raw);
    Orientation::new(0.0, 0.0, -rotated.y)
}
