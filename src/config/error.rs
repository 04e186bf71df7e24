//! Configuration error types

use std::path::PathBuf;

use snafu::Snafu;

/// Configuration error types
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// A configuration value is invalid
    #[snafu(display("Invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue { key: String, value: String, reason: String },

    /// The configuration file could not be read
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    /// The configuration file is not valid TOML for this schema
    #[snafu(display("Failed to parse config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
