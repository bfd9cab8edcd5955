//! Layered flow configuration
//!
//! Config is resolved with three layers of precedence (highest wins):
//! 1. Command-line overrides applied by the caller
//! 2. An optional TOML file
//! 3. Built-in defaults
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One rung of the quality ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityLevelConfig {
    pub width: u32,
    pub height: u32,
    /// World-space splat diameter
    pub diameter: f32,
    /// Per-splat opacity
    pub alpha: f32,
}

impl QualityLevelConfig {
    pub const fn new(width: u32, height: u32, diameter: f32, alpha: f32) -> Self {
        Self {
            width,
            height,
            diameter,
            alpha,
        }
    }

    pub fn particle_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Built-in ladder, lowest to highest density
pub const DEFAULT_QUALITY_LADDER: [QualityLevelConfig; 6] = [
    QualityLevelConfig::new(256, 256, 0.03, 0.5),
    QualityLevelConfig::new(512, 256, 0.025, 0.4),
    QualityLevelConfig::new(512, 512, 0.02, 0.3),
    QualityLevelConfig::new(1024, 512, 0.015, 0.25),
    QualityLevelConfig::new(1024, 1024, 0.0125, 0.2),
    QualityLevelConfig::new(2048, 1024, 0.01, 0.2),
];

/// Advection, lifetime and respawn parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frames slower than this are simulated with a zero step
    pub max_delta_time: f32,
    /// Fixed step used by the warm-up burst
    pub presimulation_delta_time: f32,
    pub base_lifetime: f32,
    pub max_additional_lifetime: f32,
    pub spawn_radius: f32,
    /// Radius of the de-duplication offsets applied when upsampling
    pub offset_radius: f32,
    pub base_velocity: [f32; 3],
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_delta_time: 0.2,
            presimulation_delta_time: 0.1,
            base_lifetime: 10.0,
            max_additional_lifetime: 5.0,
            spawn_radius: 0.1,
            offset_radius: 0.5,
            base_velocity: [0.2, 0.0, 0.0],
        }
    }
}

impl SimulationConfig {
    /// Number of sub-steps in the warm-up burst
    pub fn presimulation_steps(&self) -> u32 {
        (self.base_lifetime / self.presimulation_delta_time).ceil() as u32
    }
}

/// Curl-noise velocity field parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub octaves: u32,
    /// Spatial frequency applied to particle positions
    pub position_scale: f32,
    /// Rate at which the field evolves, per simulated second
    pub time_scale: f32,
    /// Scale applied to the curl before it is added to the base flow
    pub velocity_scale: f32,
    pub seed: u32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            octaves: 3,
            position_scale: 1.5,
            time_scale: 0.25,
            velocity_scale: 0.075,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Compare-exchange passes spent per frame outside of view flips
    pub passes_per_frame: u32,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            passes_per_frame: 50,
        }
    }
}

/// Splat, shadow, floor and projection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Equal-size draw slices per frame; must divide every particle count
    pub slices: u32,
    pub opacity_resolution: u32,
    pub particle_saturation: f32,
    pub particle_value: f32,
    /// How strongly accumulated opacity darkens a splat
    pub opacity_scale: f32,
    pub floor_origin: [f32; 3],
    pub floor_width: f32,
    pub floor_depth: f32,
    pub floor_shadow_strength: f32,
    pub background_distance_scale: f32,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            slices: 128,
            opacity_resolution: 1024,
            particle_saturation: 0.75,
            particle_value: 1.0,
            opacity_scale: 0.75,
            floor_origin: [-2.0, -0.75, -5.0],
            floor_width: 100.0,
            floor_depth: 100.0,
            floor_shadow_strength: 0.5,
            background_distance_scale: 0.1,
            fov_degrees: 60.0,
            near: 0.01,
            far: 10.0,
        }
    }
}

/// Directional light with an orthographic shadow volume
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    /// Points away from the light source
    pub direction: [f32; 3],
    pub up: [f32; 3],
    /// Half extent of the orthographic box in x and y
    pub half_extent: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: [0.0, -1.0, 0.0],
            up: [0.0, 0.0, 1.0],
            half_extent: 5.0,
            near: -50.0,
            far: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub distance: f32,
    pub orbit_point: [f32; 3],
    pub azimuth: f32,
    pub elevation: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Radians per pixel of drag
    pub sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            distance: 2.2,
            orbit_point: [1.2, -0.3, 0.0],
            azimuth: 0.6,
            elevation: 0.4,
            min_elevation: -0.1,
            max_elevation: std::f32::consts::FRAC_PI_2,
            sensitivity: 0.005,
        }
    }
}

/// Initial values and limits for the live parameter setters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub initial_quality: usize,
    pub initial_hue: f32,
    pub initial_time_scale: f32,
    pub max_time_scale: f32,
    pub initial_persistence: f32,
    pub max_persistence: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            initial_quality: 0,
            initial_hue: 0.0,
            initial_time_scale: 2.0,
            max_time_scale: 5.0,
            initial_persistence: 0.2,
            max_persistence: 0.5,
        }
    }
}

/// Complete flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Seed for spawn/offset tables and bootstrap lifetimes
    pub seed: u64,
    pub simulation: SimulationConfig,
    pub noise: NoiseConfig,
    pub sort: SortConfig,
    pub render: RenderConfig,
    pub light: LightConfig,
    pub camera: CameraConfig,
    pub controls: ControlsConfig,
    pub quality: Vec<QualityLevelConfig>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_F10E,
            simulation: SimulationConfig::default(),
            noise: NoiseConfig::default(),
            sort: SortConfig::default(),
            render: RenderConfig::default(),
            light: LightConfig::default(),
            camera: CameraConfig::default(),
            controls: ControlsConfig::default(),
            quality: DEFAULT_QUALITY_LADDER.to_vec(),
        }
    }
}

impl FlowConfig {
    /// Load defaults, then layer the file at `path` on top if given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FlowConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Largest particle count on the ladder
    pub fn max_particle_count(&self) -> u32 {
        self.quality
            .iter()
            .map(QualityLevelConfig::particle_count)
            .max()
            .unwrap_or(0)
    }

    /// Resolution of the highest rung, which sizes the shared offset table
    pub fn max_resolution(&self) -> (u32, u32) {
        self.quality
            .last()
            .map(|level| (level.width, level.height))
            .unwrap_or((0, 0))
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.quality.is_empty() {
            return Err(DriftError::InvalidConfig(
                "quality ladder must contain at least one level".to_string(),
            ));
        }

        if self.render.slices == 0 {
            return Err(DriftError::InvalidConfig(
                "render.slices must be positive".to_string(),
            ));
        }

        let mut previous_count = 0;
        for level in &self.quality {
            let count = level.width.checked_mul(level.height).unwrap_or(0);
            if !level.width.is_power_of_two()
                || !level.height.is_power_of_two()
                || !count.is_power_of_two()
            {
                return Err(DriftError::InvalidResolution {
                    width: level.width,
                    height: level.height,
                });
            }
            if count % self.render.slices != 0 {
                return Err(DriftError::InvalidConfig(format!(
                    "particle count {} is not divisible by {} slices",
                    count, self.render.slices
                )));
            }
            if count < previous_count {
                return Err(DriftError::InvalidConfig(
                    "quality ladder must be ordered from lowest to highest density".to_string(),
                ));
            }
            if level.diameter <= 0.0 || !(0.0..=1.0).contains(&level.alpha) {
                return Err(DriftError::InvalidConfig(format!(
                    "quality level {}x{} needs a positive diameter and alpha in [0, 1]",
                    level.width, level.height
                )));
            }
            previous_count = count;
        }

        let sim = &self.simulation;
        for (field, value) in [
            ("simulation.max_delta_time", sim.max_delta_time),
            ("simulation.presimulation_delta_time", sim.presimulation_delta_time),
            ("simulation.base_lifetime", sim.base_lifetime),
        ] {
            if value <= 0.0 {
                return Err(DriftError::InvalidConfig(format!("{field} must be positive")));
            }
        }
        if sim.max_additional_lifetime < 0.0 {
            return Err(DriftError::InvalidConfig(
                "simulation.max_additional_lifetime must not be negative".to_string(),
            ));
        }

        if self.noise.octaves == 0 {
            return Err(DriftError::InvalidConfig(
                "noise.octaves must be at least 1".to_string(),
            ));
        }
        if self.sort.passes_per_frame == 0 {
            return Err(DriftError::InvalidConfig(
                "sort.passes_per_frame must be positive".to_string(),
            ));
        }
        if self.render.opacity_resolution == 0 {
            return Err(DriftError::InvalidConfig(
                "render.opacity_resolution must be positive".to_string(),
            ));
        }

        let controls = &self.controls;
        if controls.initial_quality >= self.quality.len() {
            return Err(DriftError::InvalidQualityLevel {
                index: controls.initial_quality,
                count: self.quality.len(),
            });
        }
        check_range(
            "controls.initial_time_scale",
            controls.initial_time_scale,
            controls.max_time_scale,
        )?;
        check_range(
            "controls.initial_persistence",
            controls.initial_persistence,
            controls.max_persistence,
        )?;

        Ok(())
    }
}

fn check_range(field: &str, value: f32, max: f32) -> Result<()> {
    if !(0.0..=max).contains(&value) {
        return Err(DriftError::ValueOutOfRange {
            field: field.to_string(),
            min: 0.0,
            max: max as f64,
            value: value as f64,
        });
    }
    Ok(())
}
