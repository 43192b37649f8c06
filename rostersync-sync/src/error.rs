//! Error types for rostersync-sync.

use std::path::PathBuf;

use thiserror::Error;

use rostersync_core::error::ConfigError;

/// Failure reported by a grid store or roster source.
///
/// Stores decide which failures are worth retrying; the orchestrator only
/// looks at the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Rate limiting, timeouts, dropped connections.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Anything retrying cannot fix: missing region, permission denied, bad data.
    #[error("store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// All errors that can arise from reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A layout or rule column cannot be placed. The run skips it and goes on.
    #[error("configuration incomplete for {subject}: {reason}")]
    ConfigurationIncomplete { subject: String, reason: String },

    /// A remote call failed for good, either outright or after exhausting
    /// its transient retries.
    #[error("remote call failed: {0}")]
    RemoteFatal(String),

    /// The run budget ran out before the next remote call.
    #[error("run budget exhausted before {0}")]
    DeadlineExceeded(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (run reports).
    #[error("run report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::ConfigurationIncomplete`].
pub(crate) fn incomplete(subject: impl Into<String>, reason: impl Into<String>) -> SyncError {
    SyncError::ConfigurationIncomplete {
        subject: subject.into(),
        reason: reason.into(),
    }
}
