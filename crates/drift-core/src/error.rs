//! Error types for Drift

use thiserror::Error;

/// The main error type for Drift operations
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Quality level {index} out of range (ladder has {count} levels)")]
    InvalidQualityLevel { index: usize, count: usize },

    #[error("Invalid grid resolution {width}x{height}: both sides and their product must be powers of two")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Value out of range: {field} must be between {min} and {max}, got {value}")]
    ValueOutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Result type alias for Drift operations
pub type Result<T> = std::result::Result<T, DriftError>;

impl From<toml::de::Error> for DriftError {
    fn from(err: toml::de::Error) -> Self {
        DriftError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for DriftError {
    fn from(err: toml::ser::Error) -> Self {
        DriftError::TomlSerError(err.to_string())
    }
}
