//! Error types for rostersync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration-store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse roster config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; `~/.rostersync/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The roster config file did not exist at the expected path.
    #[error("roster config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// The config declares a version newer than this build understands.
    #[error("roster config at {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

/// A column label, index or cell reference that cannot be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("invalid coordinate '{input}': {reason}")]
    InvalidCoordinate { input: String, reason: &'static str },
}

impl CoordinateError {
    pub(crate) fn invalid(input: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidCoordinate {
            input: input.into(),
            reason,
        }
    }
}
