//! Light components.
//!
//! Position and color live on the owning node; these carry only what is
//! specific to each light type.

/// Omnidirectional light drawn as a billboard and shaded in the light pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub intensity: f32,
    /// Billboard radius in world units.
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            intensity: 0.9,
            radius: 0.1,
        }
    }
}

impl PointLight {
    pub fn new(intensity: f32, radius: f32) -> Self {
        Self { intensity, radius }
    }
}

/// Shadow-casting light. Looks from its node's position toward the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub intensity: f32,
    /// Vertical field of view of the shadow frustum, in degrees.
    pub fov_degrees: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            intensity: 0.9,
            fov_degrees: 45.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(intensity: f32, fov_degrees: f32) -> Self {
        Self {
            intensity,
            fov_degrees,
        }
    }

    #[inline]
    pub fn fov_radians(&self) -> f32 {
        self.fov_degrees.to_radians()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_light_defaults() {
        let light = PointLight::default();
        assert_eq!(light.intensity, 0.9);
        assert_eq!(light.radius, 0.1);
    }

    #[test]
    fn test_directional_light_fov_radians() {
        let light = DirectionalLight::new(1.0, 90.0);
        assert!((light.fov_radians() - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
