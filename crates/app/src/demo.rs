//! The scene the viewer starts with.

use std::f32::consts::TAU;

use glam::{Quat, Vec3};

use lumen_scene::{
    DirectionalLight, IdAllocator, MeshHandle, PointLight, SceneGraph, SceneResult, Transform,
    WORLD_UP,
};

pub const CAMERA_START: Vec3 = Vec3::new(0.0, -1.0, -4.0);

const LIGHT_COLORS: [Vec3; 2] = [Vec3::new(1.0, 1.0, 1.0), Vec3::new(0.1, 0.1, 1.0)];
const LIGHT_START: Vec3 = Vec3::new(-2.0, -1.0, -2.0);

pub struct DemoMeshes {
    pub cube: MeshHandle,
    pub plane: MeshHandle,
}

/// A cube on a ground plane, lit by point lights spread evenly around the
/// vertical axis. The first light also casts the shadow.
pub fn populate(
    scene: &mut SceneGraph,
    ids: &mut IdAllocator,
    meshes: &DemoMeshes,
) -> SceneResult<()> {
    scene.spawn_mesh(
        ids,
        "cube",
        meshes.cube,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::splat(3.0)),
    )?;
    scene.spawn_mesh(
        ids,
        "ground",
        meshes.plane,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::splat(10.0)),
    )?;

    for (i, color) in LIGHT_COLORS.iter().enumerate() {
        let angle = i as f32 * TAU / LIGHT_COLORS.len() as f32;
        let position = Quat::from_axis_angle(WORLD_UP, angle) * LIGHT_START;
        scene.spawn_point_light(ids, position, *color, PointLight::new(0.9, 0.1))?;

        if i == 0 {
            scene.spawn_directional_light(
                ids,
                position,
                LIGHT_COLORS[1],
                DirectionalLight::new(0.9, 90.0),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> SceneGraph {
        let mut scene = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let meshes = DemoMeshes {
            cube: MeshHandle(0),
            plane: MeshHandle(1),
        };
        populate(&mut scene, &mut ids, &meshes).unwrap();
        scene
    }

    #[test]
    fn test_demo_contents() {
        let scene = demo();
        assert_eq!(scene.len(), 5);
        assert_eq!(scene.iter().filter(|n| n.mesh().is_some()).count(), 2);
        assert_eq!(scene.iter().filter(|n| n.point_light().is_some()).count(), 2);
        assert_eq!(
            scene
                .iter()
                .filter(|n| n.directional_light().is_some())
                .count(),
            1
        );
    }

    #[test]
    fn test_lights_are_opposite() {
        let scene = demo();
        let lights: Vec<Vec3> = scene
            .iter()
            .filter(|n| n.point_light().is_some())
            .map(|n| n.transform().translation)
            .collect();
        assert!((lights[0] - LIGHT_START).length() < 1e-5);
        assert!((lights[1] - Vec3::new(2.0, -1.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_sun_shares_first_light_position() {
        let scene = demo();
        let sun = scene
            .iter()
            .find(|n| n.directional_light().is_some())
            .unwrap();
        assert!((sun.transform().translation - LIGHT_START).length() < 1e-5);
        assert_eq!(sun.directional_light().unwrap().fov_degrees, 90.0);
    }
}
