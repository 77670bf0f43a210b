//! Keyboard fly camera.

use std::f32::consts::{FRAC_PI_2, TAU};

use glam::Vec3;

use lumen_platform::{InputState, KeyCode};
use lumen_scene::{Camera, WORLD_UP};

/// Camera position and Euler rotation (x = pitch, y = yaw).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewer {
    pub position: Vec3,
    pub rotation: Vec3,
}

impl Viewer {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::ZERO,
        }
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.set_view_yxz(self.position, self.rotation);
    }
}

pub struct KeyboardController {
    /// Radians per second.
    pub look_speed: f32,
    /// Units per second.
    pub move_speed: f32,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self {
            look_speed: 1.0,
            move_speed: 2.0,
        }
    }
}

impl KeyboardController {
    /// Arrows look around, WASD moves in the horizontal plane relative to
    /// yaw, Q and E move down and up.
    pub fn update(&self, input: &InputState, dt: f32, viewer: &mut Viewer) {
        let look = Vec3::new(
            input.axis(KeyCode::ArrowUp, KeyCode::ArrowDown),
            input.axis(KeyCode::ArrowRight, KeyCode::ArrowLeft),
            0.0,
        );
        if look.length_squared() > f32::EPSILON {
            viewer.rotation += look.normalize() * self.look_speed * dt;
        }
        viewer.rotation.x = viewer.rotation.x.clamp(-FRAC_PI_2, FRAC_PI_2);
        viewer.rotation.y = viewer.rotation.y.rem_euclid(TAU);

        let yaw = viewer.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);

        let movement = forward * input.axis(KeyCode::KeyW, KeyCode::KeyS)
            + right * input.axis(KeyCode::KeyD, KeyCode::KeyA)
            + WORLD_UP * input.axis(KeyCode::KeyE, KeyCode::KeyQ);
        if movement.length_squared() > f32::EPSILON {
            viewer.position += movement.normalize() * self.move_speed * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressed(keys: &[KeyCode]) -> InputState {
        let mut input = InputState::new();
        for &key in keys {
            input.on_key_pressed(key);
        }
        input
    }

    #[test]
    fn test_forward_follows_yaw() {
        let controller = KeyboardController::default();
        let mut viewer = Viewer::at(Vec3::ZERO);
        controller.update(&pressed(&[KeyCode::KeyW]), 0.5, &mut viewer);
        assert!((viewer.position - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);

        let mut turned = Viewer::at(Vec3::ZERO);
        turned.rotation.y = FRAC_PI_2;
        controller.update(&pressed(&[KeyCode::KeyW]), 0.5, &mut turned);
        assert!((turned.position - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_e_moves_up() {
        let controller = KeyboardController::default();
        let mut viewer = Viewer::at(Vec3::ZERO);
        controller.update(&pressed(&[KeyCode::KeyE]), 1.0, &mut viewer);
        assert!((viewer.position - Vec3::new(0.0, -2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_diagonal_speed_is_normalized() {
        let controller = KeyboardController::default();
        let mut viewer = Viewer::at(Vec3::ZERO);
        controller.update(&pressed(&[KeyCode::KeyW, KeyCode::KeyD]), 1.0, &mut viewer);
        assert!((viewer.position.length() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let controller = KeyboardController::default();
        let mut viewer = Viewer::at(Vec3::ZERO);
        controller.update(&pressed(&[KeyCode::ArrowUp]), 10.0, &mut viewer);
        assert_eq!(viewer.rotation.x, FRAC_PI_2);
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let controller = KeyboardController::default();
        let mut viewer = Viewer::at(Vec3::ONE);
        controller.update(
            &pressed(&[KeyCode::KeyA, KeyCode::KeyD, KeyCode::ArrowLeft, KeyCode::ArrowRight]),
            1.0,
            &mut viewer,
        );
        assert_eq!(viewer, Viewer::at(Vec3::ONE));
    }
}
