//! Local transform of a scene node.
//!
//! Rotation is stored as Euler angles in radians and applied in Y, X, Z
//! order (yaw, pitch, roll), the same convention the camera uses.
//!
//! ```
//! use lumen_scene::Transform;
//! use glam::Vec3;
//!
//! let t = Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)).with_scale(Vec3::splat(2.0));
//! let p = t.model_matrix().transform_point3(Vec3::X);
//! assert!((p - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

/// Scale components closer to zero than this make the normal matrix
/// degenerate.
const MIN_SCALE: f32 = 1e-6;

/// Translation, Euler rotation and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    /// Radians about X (pitch), Y (yaw) and Z (roll).
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn quat(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.rotation.y,
            self.rotation.x,
            self.rotation.z,
        )
    }

    /// `T * R * S`.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.translation)
    }

    /// `R * S^-1`, embedded in a 4x4 matrix for the shaders.
    ///
    /// This equals the inverse transpose of the model matrix's linear part
    /// for any translate-rotate-scale transform, so it is cheap and still
    /// correct for non-uniform scale. Shear from non-uniformly scaled
    /// parents is only handled if the per-node matrices are multiplied in
    /// the same order as the model matrices. A degenerate scale falls back
    /// to the rotation alone.
    pub fn normal_matrix(&self) -> Mat4 {
        let rotation = Mat3::from_quat(self.quat());
        if self.scale.abs().min_element() < MIN_SCALE {
            return Mat4::from_mat3(rotation);
        }
        Mat4::from_mat3(rotation * Mat3::from_diagonal(self.scale.recip()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < EPSILON
    }

    #[test]
    fn test_transform_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.model_matrix(), Mat4::IDENTITY);
        assert_eq!(t.normal_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_model_matrix_scales_then_rotates_then_translates() {
        let t = Transform::from_translation(Vec3::new(0.0, 0.0, 5.0))
            .with_rotation(Vec3::new(0.0, FRAC_PI_2, 0.0))
            .with_scale(Vec3::splat(2.0));

        let p = t.model_matrix().transform_point3(Vec3::X);
        // X scaled to 2, yawed 90 degrees onto -Z, then moved +5 along Z.
        assert!(approx_eq_vec3(p, Vec3::new(0.0, 0.0, 3.0)), "{:?}", p);
    }

    #[test]
    fn test_normal_matrix_matches_inverse_transpose() {
        let t = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_rotation(Vec3::new(0.3, -0.7, 0.2))
            .with_scale(Vec3::new(1.0, 2.0, 0.5));

        let linear = Mat3::from_mat4(t.model_matrix());
        let expected = Mat4::from_mat3(linear.inverse().transpose());
        assert!(t.normal_matrix().abs_diff_eq(expected, EPSILON));
    }

    #[test]
    fn test_normal_matrix_has_no_translation() {
        let t = Transform::from_translation(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(t.normal_matrix().w_axis, glam::Vec4::W);
    }

    #[test]
    fn test_normal_matrix_degenerate_scale_is_finite() {
        let t = Transform::default().with_scale(Vec3::new(1.0, 0.0, 1.0));
        let normal = t.normal_matrix();
        assert!(normal.is_finite());
        assert_eq!(normal, Mat4::IDENTITY);
    }
}
