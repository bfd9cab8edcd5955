//! Drift Core - Foundational types for the Drift particle flow
//!
//! This crate provides the types every other Drift crate depends on:
//! - `FlowConfig` - layered TOML configuration and the quality ladder
//! - `hsv_to_rgb` - particle colour from the hue control
//! - Error types and Result alias

mod color;
pub mod config;
mod error;

pub use color::hsv_to_rgb;
pub use config::{
    CameraConfig, ControlsConfig, FlowConfig, LightConfig, NoiseConfig, QualityLevelConfig,
    RenderConfig, SimulationConfig, SortConfig, DEFAULT_QUALITY_LADDER,
};
pub use error::{DriftError, Result};
