//! Uniform buffer object definitions for shaders.
//!
//! These structures must match the GLSL uniform blocks exactly (std140).
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Capacity of the point light array in [`SceneUbo`].
pub const MAX_LIGHTS: usize = 10;

/// Per-frame camera matrices (set 0, binding 0).
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
/// - Offset 192: model normal matrix (64 bytes)
/// - Total size: 256 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectUbo {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub model_normal: Mat4,
}

impl Default for ObjectUbo {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            model_normal: Mat4::IDENTITY,
        }
    }
}

impl ObjectUbo {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Camera matrices with identity model transforms. Per-object
    /// transforms travel in push constants.
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            ..Self::default()
        }
    }
}

/// One entry of the point light array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightData {
    /// World position, `w = 1`.
    pub position: Vec4,
    /// RGB color, intensity in `w`.
    pub color: Vec4,
}

/// Shadow-casting light.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    pub position: Vec4,
    pub view_projection: Mat4,
}

impl Default for DirectionalLightData {
    fn default() -> Self {
        Self {
            position: Vec4::ZERO,
            view_projection: Mat4::IDENTITY,
        }
    }
}

/// Per-frame lighting (set 0, binding 1).
///
/// # Memory Layout
///
/// - Offset 0: inverse view matrix (64 bytes)
/// - Offset 64: ambient light color, intensity in `w` (16 bytes)
/// - Offset 80: point lights (10 x 32 bytes)
/// - Offset 400: directional light (80 bytes)
/// - Offset 480: light count (4 bytes) + padding (12 bytes)
/// - Total size: 496 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneUbo {
    pub inverse_view: Mat4,
    pub ambient_light_color: Vec4,
    pub point_lights: [PointLightData; MAX_LIGHTS],
    pub directional_light: DirectionalLightData,
    pub num_lights: i32,
    pub _padding: [i32; 3],
}

impl Default for SceneUbo {
    fn default() -> Self {
        Self {
            inverse_view: Mat4::IDENTITY,
            ambient_light_color: Vec4::new(1.0, 1.0, 1.0, 0.02),
            point_lights: [PointLightData::default(); MAX_LIGHTS],
            directional_light: DirectionalLightData::default(),
            num_lights: 0,
            _padding: [0; 3],
        }
    }
}

impl SceneUbo {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(inverse_view: Mat4) -> Self {
        Self {
            inverse_view,
            ..Self::default()
        }
    }

    /// Appends a point light.
    ///
    /// # Panics
    ///
    /// Panics if [`MAX_LIGHTS`] lights are already stored.
    pub fn push_point_light(&mut self, position: Vec3, color: Vec3, intensity: f32) {
        let index = self.num_lights as usize;
        assert!(
            index < MAX_LIGHTS,
            "point lights exceed the maximum of {}",
            MAX_LIGHTS
        );
        self.point_lights[index] = PointLightData {
            position: position.extend(1.0),
            color: color.extend(intensity),
        };
        self.num_lights += 1;
    }

    pub fn set_directional_light(&mut self, position: Vec3, view_projection: Mat4) {
        self.directional_light = DirectionalLightData {
            position: position.extend(1.0),
            view_projection,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_object_ubo_size() {
        // 4 Mat4 (4 * 64) = 256 bytes
        assert_eq!(ObjectUbo::SIZE, 256);
        assert_eq!(std::mem::align_of::<ObjectUbo>(), 16);
    }

    #[test]
    fn test_scene_ubo_layout() {
        assert_eq!(std::mem::size_of::<PointLightData>(), 32);
        assert_eq!(std::mem::size_of::<DirectionalLightData>(), 80);
        assert_eq!(offset_of!(SceneUbo, ambient_light_color), 64);
        assert_eq!(offset_of!(SceneUbo, point_lights), 80);
        assert_eq!(offset_of!(SceneUbo, directional_light), 400);
        assert_eq!(offset_of!(SceneUbo, num_lights), 480);
        assert_eq!(SceneUbo::SIZE, 496);
    }

    #[test]
    fn test_object_ubo_new() {
        let view = Mat4::from_translation(Vec3::new(0.0, 1.0, 4.0));
        let projection = Mat4::perspective_lh(1.0, 1.5, 0.01, 100.0);
        let ubo = ObjectUbo::new(view, projection);

        assert_eq!(ubo.view, view);
        assert_eq!(ubo.projection, projection);
        assert_eq!(ubo.model, Mat4::IDENTITY);
        assert_eq!(ubo.model_normal, Mat4::IDENTITY);
    }

    #[test]
    fn test_scene_ubo_default_ambient() {
        let ubo = SceneUbo::default();
        assert_eq!(ubo.ambient_light_color, Vec4::new(1.0, 1.0, 1.0, 0.02));
        assert_eq!(ubo.num_lights, 0);
    }

    #[test]
    fn test_push_point_light() {
        let mut ubo = SceneUbo::default();
        ubo.push_point_light(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.1, 0.1, 1.0), 0.9);

        assert_eq!(ubo.num_lights, 1);
        assert_eq!(ubo.point_lights[0].position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(ubo.point_lights[0].color, Vec4::new(0.1, 0.1, 1.0, 0.9));
    }

    #[test]
    #[should_panic(expected = "point lights exceed")]
    fn test_push_point_light_past_capacity_panics() {
        let mut ubo = SceneUbo::default();
        for _ in 0..=MAX_LIGHTS {
            ubo.push_point_light(Vec3::ZERO, Vec3::ONE, 1.0);
        }
    }

    #[test]
    fn test_ubo_pod_zeroable() {
        let scene = SceneUbo::default();
        let bytes: &[u8] = bytemuck::bytes_of(&scene);
        assert_eq!(bytes.len(), SceneUbo::SIZE);

        let object = ObjectUbo::default();
        let bytes: &[u8] = bytemuck::bytes_of(&object);
        assert_eq!(bytes.len(), ObjectUbo::SIZE);
    }
}
