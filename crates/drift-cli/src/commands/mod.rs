//! CLI command implementations

pub mod render;
pub mod run;
pub mod simulate;

use anyhow::{Context, Result};
use clap::Args;
use drift_core::FlowConfig;
use std::path::PathBuf;

/// Configuration flags shared by every command.
///
/// Values layer as built-in defaults, then the `--config` file, then the
/// individual flags.
#[derive(Args, Debug, Clone, Default)]
pub struct FlowArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial quality level (index into the ladder)
    #[arg(long)]
    pub quality: Option<usize>,

    /// Seed for the spawn and offset tables
    #[arg(long)]
    pub seed: Option<u64>,

    /// Initial simulation speed multiplier
    #[arg(long)]
    pub time_scale: Option<f32>,

    /// Initial weight of the higher noise octaves
    #[arg(long)]
    pub persistence: Option<f32>,

    /// Initial particle hue in [0, 1)
    #[arg(long)]
    pub hue: Option<f32>,
}

impl FlowArgs {
    pub fn load(&self) -> Result<FlowConfig> {
        let mut config = FlowConfig::load(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("Failed to load config from {}", path.display()),
            None => "Invalid built-in configuration".to_string(),
        })?;
        self.apply(&mut config);
        config.validate().context("Invalid command-line overrides")?;
        Ok(config)
    }

    fn apply(&self, config: &mut FlowConfig) {
        let controls = &mut config.controls;
        if let Some(quality) = self.quality {
            controls.initial_quality = quality;
        }
        if let Some(time_scale) = self.time_scale {
            controls.initial_time_scale = time_scale;
        }
        if let Some(persistence) = self.persistence {
            controls.initial_persistence = persistence;
        }
        if let Some(hue) = self.hue {
            controls.initial_hue = hue.rem_euclid(1.0);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}
