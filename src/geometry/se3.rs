//! Rigid-body transform used for tag poses.
//!
//! A tag pose is stored as `T_camera_tag`: it maps points expressed in the
//! tag frame (tag center at the origin, tag plane at z = 0) into the camera
//! frame (x right, y down, z along the optical axis).

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Rigid transform in SE(3): rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation.
    ///
    /// The matrix is assumed orthonormal; small drift is absorbed by the
    /// quaternion conversion.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Distance from the frame origin to the transformed origin.
    ///
    /// For a tag pose this is the camera-to-tag-center range.
    pub fn range(&self) -> f64 {
        self.translation.norm()
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_range_is_translation_norm() {
        let pose = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(3.0, 0.0, 4.0),
        };
        assert_relative_eq!(pose.range(), 5.0, epsilon = 1e-12);
    }
}
