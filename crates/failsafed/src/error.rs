use thiserror::Error;

use failsafe_core::ConfigError;
use failsafe_state::StateError;
use failsafe_sync::SyncError;

/// Failures while assembling the orchestrator. Once running, nothing
/// is fatal.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync setup: {0}")]
    Sync(#[from] SyncError),

    #[error("state store: {0}")]
    State(#[from] StateError),
}
