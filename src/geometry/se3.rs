//! SE3: rigid-body transformation (rotation + translation).

use nalgebra::{UnitQuaternion, Vector3};

/// 6-DOF rigid-body transformation.
///
/// Transforms points as: p' = R * p + t
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Inverse transformation: (R, t)^-1 = (R^-1, -R^-1 t).
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transformations: self * other.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a point.
    pub fn transform(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Euclidean distance between the translations of two poses.
    pub fn translation_distance(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }

    /// Relative rotation angle to another pose, in radians.
    pub fn rotation_angle_to(&self, other: &SE3) -> f64 {
        (self.rotation.inverse() * other.rotation).angle()
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
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
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let pose = SE3::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let ident = pose.compose(&pose.inverse());
        assert!(ident.translation.norm() < 1e-12);
        assert!(ident.rotation.angle() < 1e-12);
    }

    #[test]
    fn test_transform_point() {
        let pose = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let p = pose.transform(&Vector3::new(1.0, 0.0, 0.0));
        assert!((p - Vector3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_translation_distance() {
        let a = SE3::identity();
        let mut b = SE3::identity();
        b.translation = Vector3::new(3.0, 4.0, 0.0);
        assert!((a.translation_distance(&b) - 5.0).abs() < 1e-12);
    }
}
