//! Light animation and per-frame light uniforms.

use std::cmp::Ordering;

use glam::{Mat4, Quat, Vec3};

use lumen_scene::{Camera, DirectionalLight, ObjectId, SceneGraph};

use crate::ubo::{ObjectUbo, SceneUbo};

/// Axis the lights orbit around (world up is `-Y`).
pub const LIGHT_ORBIT_AXIS: Vec3 = Vec3::NEG_Y;

/// A point light resolved to world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLightInstance {
    pub id: ObjectId,
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

/// Near and far planes of the shadow-casting light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowProjection {
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowProjection {
    fn default() -> Self {
        Self {
            near: 1.0,
            far: 94.0,
        }
    }
}

/// Rotates every light node by `angle` radians about [`LIGHT_ORBIT_AXIS`].
pub fn orbit_lights(scene: &mut SceneGraph, angle: f32) {
    if angle == 0.0 {
        return;
    }
    let rotation = Quat::from_axis_angle(LIGHT_ORBIT_AXIS, angle);
    for node in scene.iter_mut() {
        if node.point_light().is_some() || node.directional_light().is_some() {
            let translation = &mut node.transform_mut().translation;
            *translation = rotation * *translation;
        }
    }
}

/// Point lights in scene iteration order.
pub fn collect_point_lights(scene: &SceneGraph) -> Vec<PointLightInstance> {
    scene
        .iter()
        .filter_map(|node| {
            let light = node.point_light()?;
            Some(PointLightInstance {
                id: node.id(),
                position: scene.world_position(node),
                color: node.color,
                intensity: light.intensity,
                radius: light.radius,
            })
        })
        .collect()
}

/// Orders lights farthest-first from `camera_position` so blended
/// billboards composite correctly. Equal distances keep their order.
pub fn sort_back_to_front(lights: &mut [PointLightInstance], camera_position: Vec3) {
    lights.sort_by(|a, b| {
        let da = a.position.distance_squared(camera_position);
        let db = b.position.distance_squared(camera_position);
        db.partial_cmp(&da).unwrap_or(Ordering::Equal)
    });
}

/// First directional light in iteration order, with its world position.
pub fn first_directional_light(scene: &SceneGraph) -> Option<(Vec3, DirectionalLight)> {
    scene.iter().find_map(|node| {
        node.directional_light()
            .map(|light| (scene.world_position(node), *light))
    })
}

/// View-projection of the shadow-casting light, looking at the origin.
pub fn directional_view_projection(
    position: Vec3,
    light: &DirectionalLight,
    aspect_ratio: f32,
    projection: ShadowProjection,
) -> Mat4 {
    let proj = Mat4::perspective_rh(
        light.fov_radians(),
        aspect_ratio,
        projection.near,
        projection.far,
    );
    let view = Mat4::look_at_rh(position, Vec3::ZERO, Vec3::Y);
    proj * view
}

/// Camera block of the per-frame uniforms.
pub fn object_uniforms(camera: &Camera) -> ObjectUbo {
    ObjectUbo::new(camera.view(), camera.projection())
}

/// Lighting block of the per-frame uniforms.
///
/// # Panics
///
/// Panics if the scene holds more than [`crate::ubo::MAX_LIGHTS`] point
/// lights.
pub fn scene_uniforms(
    scene: &SceneGraph,
    camera: &Camera,
    aspect_ratio: f32,
    projection: ShadowProjection,
) -> SceneUbo {
    let mut ubo = SceneUbo::new(camera.inverse_view());
    for light in collect_point_lights(scene) {
        ubo.push_point_light(light.position, light.color, light.intensity);
    }
    if let Some((position, light)) = first_directional_light(scene) {
        let view_projection =
            directional_view_projection(position, &light, aspect_ratio, projection);
        ubo.set_directional_light(position, view_projection);
    }
    ubo
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_scene::{IdAllocator, PointLight};
    use std::f32::consts::PI;

    fn light_at(position: Vec3, index: u64) -> PointLightInstance {
        PointLightInstance {
            id: ObjectId::from_raw(index),
            position,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 0.1,
        }
    }

    #[test]
    fn test_sort_back_to_front() {
        // Squared distances 4, 1, 9.
        let mut lights = vec![
            light_at(Vec3::new(2.0, 0.0, 0.0), 0),
            light_at(Vec3::new(1.0, 0.0, 0.0), 1),
            light_at(Vec3::new(3.0, 0.0, 0.0), 2),
        ];
        sort_back_to_front(&mut lights, Vec3::ZERO);

        let order: Vec<u64> = lights.iter().map(|l| l.id.raw()).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_sort_keeps_equal_distances_and_duplicates() {
        let mut lights = vec![
            light_at(Vec3::X, 0),
            light_at(Vec3::NEG_X, 1),
            light_at(Vec3::Y, 2),
        ];
        sort_back_to_front(&mut lights, Vec3::ZERO);

        let order: Vec<u64> = lights.iter().map(|l| l.id.raw()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_orbit_lights_moves_only_lights() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let light = scene.spawn_point_light(&mut ids, Vec3::X, Vec3::ONE, PointLight::default()).unwrap();
        let plain = scene.add_node(&mut ids, "plain", None).unwrap();
        scene.get_mut(plain).unwrap().transform_mut().translation = Vec3::X;

        orbit_lights(&mut scene, PI);

        let moved = scene.get(light).unwrap().transform().translation;
        assert!((moved - Vec3::NEG_X).length() < 1e-5);
        assert_eq!(scene.get(plain).unwrap().transform().translation, Vec3::X);
    }

    #[test]
    fn test_orbit_preserves_height_and_radius() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let start = Vec3::new(-2.0, -1.0, -2.0);
        let light = scene.spawn_point_light(&mut ids, start, Vec3::ONE, PointLight::default()).unwrap();

        orbit_lights(&mut scene, 0.37);

        let moved = scene.get(light).unwrap().transform().translation;
        assert!((moved.y - start.y).abs() < 1e-5);
        assert!((moved.length() - start.length()).abs() < 1e-5);
    }

    #[test]
    fn test_scene_uniforms_collects_lights() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        scene.spawn_point_light(&mut ids, Vec3::X, Vec3::Z, PointLight::new(0.5, 0.1)).unwrap();
        scene.spawn_point_light(&mut ids, Vec3::Y, Vec3::ONE, PointLight::default()).unwrap();
        let sun_position = Vec3::new(-2.0, -1.0, -2.0);
        let sun = DirectionalLight::new(0.9, 90.0);
        scene.spawn_directional_light(&mut ids, sun_position, Vec3::ONE, sun).unwrap();

        let camera = Camera::new();
        let ubo = scene_uniforms(&scene, &camera, 1.5, ShadowProjection::default());

        assert_eq!(ubo.num_lights, 2);
        assert_eq!(ubo.point_lights[0].position, Vec3::X.extend(1.0));
        assert_eq!(ubo.point_lights[0].color, Vec3::Z.extend(0.5));
        assert_eq!(ubo.directional_light.position, sun_position.extend(1.0));
        assert_eq!(
            ubo.directional_light.view_projection,
            directional_view_projection(sun_position, &sun, 1.5, ShadowProjection::default())
        );
    }

    #[test]
    fn test_first_directional_light_wins() {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        scene.spawn_directional_light(&mut ids, Vec3::X, Vec3::ONE, DirectionalLight::new(1.0, 30.0)).unwrap();
        scene.spawn_directional_light(&mut ids, Vec3::Y, Vec3::ONE, DirectionalLight::new(1.0, 60.0)).unwrap();

        let (position, light) = first_directional_light(&scene).unwrap();
        assert_eq!(position, Vec3::X);
        assert_eq!(light.fov_degrees, 30.0);
    }

    #[test]
    fn test_directional_view_projection_depth_range() {
        let position = Vec3::new(0.0, -10.0, -10.0);
        let light = DirectionalLight::new(1.0, 90.0);
        let vp = directional_view_projection(position, &light, 1.0, ShadowProjection::default());

        // The origin is in front of the light, inside the clip volume.
        let clip = vp.project_point3(Vec3::ZERO);
        assert!(clip.z > 0.0 && clip.z < 1.0);
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
    }
}
