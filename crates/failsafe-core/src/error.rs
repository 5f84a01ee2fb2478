//! Configuration errors. These are the only errors fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("environment variable {var} (for {field}) is not set")]
    MissingSecret { var: String, field: String },
}
