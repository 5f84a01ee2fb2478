//! Probe errors. Never fatal: each one just counts as a failed probe.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("process not found: {0}")]
    ProcessMissing(String),

    #[error("invalid probe target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}
