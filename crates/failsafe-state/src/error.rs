//! Error types for the status files and the instance lock.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for status file operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("read error on {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write error on {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt status file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Errors from the single-instance guard.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another orchestrator holds the lock. Expected and benign.
    #[error("another instance holds {path} (pid {pid:?})")]
    Contended { path: PathBuf, pid: Option<u32> },

    #[error("lock file error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
