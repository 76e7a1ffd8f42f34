//! Error types for G-code generation.

use thiserror::Error;
use vcad_slicer::SlicerError;

/// Problems with the machine configuration, found before any output.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Flavor name not recognized.
    #[error("unknown G-code flavor: {0}")]
    UnknownFlavor(String),

    /// No extruders configured.
    #[error("at least one extruder must be configured")]
    NoExtruders,

    /// A tool has no extruder configuration.
    #[error("no extruder configured for tool {0}")]
    MissingExtruder(u32),

    /// A setting is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Configuration file is not valid TOML for these settings.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop G-code generation.
#[derive(Error, Debug)]
pub enum GcodeError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Print model rejected.
    #[error(transparent)]
    Input(#[from] SlicerError),

    /// Generation was cancelled between layers.
    #[error("generation cancelled before layer z={print_z}")]
    Cancelled {
        /// Layer that was about to be emitted (mm).
        print_z: f64,
    },
}

/// Result type for G-code generation.
pub type Result<T> = std::result::Result<T, GcodeError>;
