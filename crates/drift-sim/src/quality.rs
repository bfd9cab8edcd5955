//! Quality ladder

use crate::grid::Resolution;
use drift_core::{DriftError, FlowConfig, Result};

/// One validated rung: grid size plus the splat appearance used at that density
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QualityLevel {
    pub resolution: Resolution,
    pub diameter: f32,
    pub alpha: f32,
}

impl QualityLevel {
    pub fn particle_count(&self) -> u32 {
        self.resolution.count()
    }
}

/// Quality levels ordered from lowest to highest particle count
#[derive(Clone, Debug)]
pub struct QualityLadder {
    levels: Vec<QualityLevel>,
}

impl QualityLadder {
    pub fn from_config(config: &FlowConfig) -> Result<Self> {
        let levels = config
            .quality
            .iter()
            .map(|level| {
                Ok(QualityLevel {
                    resolution: Resolution::new(level.width, level.height)?,
                    diameter: level.diameter,
                    alpha: level.alpha,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if levels.is_empty() {
            return Err(DriftError::InvalidConfig(
                "quality ladder must contain at least one level".to_string(),
            ));
        }
        Ok(Self { levels })
    }

    pub fn get(&self, index: usize) -> Result<&QualityLevel> {
        self.levels.get(index).ok_or(DriftError::InvalidQualityLevel {
            index,
            count: self.levels.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QualityLevel> {
        self.levels.iter()
    }

    /// The highest rung; its resolution sizes the shared offset table
    pub fn highest(&self) -> &QualityLevel {
        // Construction guarantees at least one level
        &self.levels[self.levels.len() - 1]
    }
}
