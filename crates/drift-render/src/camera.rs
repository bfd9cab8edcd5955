//! Orbit camera driven by mouse drags

use drift_core::CameraConfig;
use drift_sim::ViewSource;
use glam::{Mat3, Mat4, Vec3};

/// Camera orbiting a fixed point at a fixed distance
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    /// Distance from the orbit point
    pub distance: f32,
    /// Point the camera orbits around
    pub orbit_point: Vec3,
    /// Horizontal angle in radians
    pub azimuth: f32,
    /// Vertical angle in radians
    pub elevation: f32,
    min_elevation: f32,
    max_elevation: f32,
    sensitivity: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new(&CameraConfig::default())
    }
}

impl OrbitCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            distance: config.distance,
            orbit_point: Vec3::from_array(config.orbit_point),
            azimuth: config.azimuth,
            elevation: config.elevation.clamp(config.min_elevation, config.max_elevation),
            min_elevation: config.min_elevation,
            max_elevation: config.max_elevation,
            sensitivity: config.sensitivity,
        }
    }

    /// Apply a mouse drag in pixels
    pub fn drag(&mut self, dx: f32, dy: f32) {
        self.azimuth += dx * self.sensitivity;
        self.elevation = (self.elevation + dy * self.sensitivity)
            .clamp(self.min_elevation, self.max_elevation);
    }

    /// Place the camera at absolute angles in radians; elevation is clamped
    pub fn set_angles(&mut self, azimuth: f32, elevation: f32) {
        self.azimuth = azimuth;
        self.elevation = elevation.clamp(self.min_elevation, self.max_elevation);
    }

    fn rotation(&self) -> Mat3 {
        Mat3::from_rotation_x(self.elevation) * Mat3::from_rotation_y(self.azimuth)
    }

    /// World-space camera position
    pub fn position(&self) -> Vec3 {
        self.orbit_point - self.view_direction() * self.distance
    }
}

impl ViewSource for OrbitCamera {
    fn view_direction(&self) -> Vec3 {
        // The camera looks down -Z in view space
        self.rotation().transpose() * Vec3::NEG_Z
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, -self.distance))
            * Mat4::from_mat3(self.rotation())
            * Mat4::from_translation(-self.orbit_point)
    }
}
