use async_trait::async_trait;
use tracing::debug;

use failsafe_core::ActivationRequest;

use crate::adapter::{Activation, AppResult, ProviderAdapter, ProviderStatus};
use crate::error::ActivationError;

/// The local primary. It is only ever probed; activating it is the
/// absence of a standby, so every call is a successful no-op.
pub struct LocalProvider {
    name: String,
}

impl LocalProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&self, _request: &ActivationRequest) -> Result<Activation, ActivationError> {
        debug!(provider = %self.name, "local provider needs no activation");
        Ok(Activation::single(&self.name, AppResult::AlreadyActive))
    }

    async fn deactivate(&self) -> Result<(), ActivationError> {
        debug!(provider = %self.name, "local provider is never deactivated");
        Ok(())
    }

    async fn status(&self) -> ProviderStatus {
        ProviderStatus {
            provider: self.name.clone(),
            active: true,
            ..ProviderStatus::default()
        }
    }
}
