//! Sync errors. Transient by nature: retried, then reported.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid sync destination: {0}")]
    InvalidDestination(String),

    #[error("invalid exclude pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("no source paths exist")]
    NothingToSync,

    #[error("sync gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}
