//! Settings error types.

use thiserror::Error;

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors from loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading the settings file failed.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON, or does not match the schema.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override carried an unusable value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvOverride {
        /// Environment variable name.
        var: String,
        /// The rejected value.
        value: String,
    },
}
