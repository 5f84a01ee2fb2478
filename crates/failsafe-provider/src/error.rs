//! Provider errors.
//!
//! `ActivationError` feeds the circuit breaker's activation failure
//! count; it is never fatal to the orchestrator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered {status}: {body}")]
    Rejected { url: String, status: u16, body: String },

    #[error("standby {app} not healthy after {attempts} health checks")]
    Unhealthy { app: String, attempts: u32 },

    #[error("none of {attempted} apps activated: {failures}")]
    NoAppsActivated { attempted: usize, failures: String },

    #[error("deactivation incomplete for {failed:?}")]
    DeactivationIncomplete { failed: Vec<String> },

    #[error("control plane: {0}")]
    Control(#[from] ControlError),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control request {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("control API {url} answered {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("unexpected control API response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Trim a response body for error messages.
pub(crate) fn snippet(body: &str) -> String {
    body.trim().chars().take(300).collect()
}
