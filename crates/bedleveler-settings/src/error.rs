//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Errors raised while loading, saving or validating printer descriptors.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The descriptor could not be serialized.
    #[error("Failed to save printer info: {0}")]
    SaveError(String),

    /// A descriptor value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The descriptor was written by an incompatible version.
    #[error("Outdated or corrupt printer info file detected (version {found}, expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// The file extension is neither `.json` nor `.toml`.
    #[error("Unsupported printer info format: {0}")]
    UnsupportedFormat(String),

    /// No descriptor matches the given name.
    #[error("Printer info not found: {0}")]
    NotFound(String),

    /// The configuration directory could not be resolved.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SettingsError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        SettingsError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;
