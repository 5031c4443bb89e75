use glam::{Quat, Vec3};
use thiserror::Error;

/// Direction the device reports when it lies flat: straight down.
pub const CANONICAL_DOWN: Vec3 = Vec3::NEG_Z;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("Reference sample {0} has no usable direction")]
    DegenerateReference(Vec3),
}

/// Correction captured from the first sample of a connection.
///
/// Holds the inverse of the rotation that carries [`CANONICAL_DOWN`] onto the
/// reference sample, so applying it re-expresses any later sample relative to
/// the orientation the device had at calibration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    reference: Vec3,
    correction: Quat,
}

impl CalibrationTransform {
    pub fn calibrate(reference: Vec3) -> Result<Self, CalibrationError> {
        let direction = reference
            .try_normalize()
            .ok_or(CalibrationError::DegenerateReference(reference))?;

        let to_reference = Quat::from_rotation_arc(CANONICAL_DOWN, direction);
        let correction = to_reference.inverse();

        tracing::info!(
            ref_x = reference.x,
            ref_y = reference.y,
            ref_z = reference.z,
            "Accelerometer calibrated"
        );
        Ok(Self {
            reference,
            correction,
        })
    }

    /// Rotate a raw sample into the calibrated frame. Length is preserved.
    pub fn apply(&self, sample: Vec3) -> Vec3 {
        self.correction * sample
    }

    /// The sample the transform was derived from.
    pub fn reference(&self) -> Vec3 {
        self.reference
    }

    pub fn rotation(&self) -> Quat {
        self.correction
    }
}
