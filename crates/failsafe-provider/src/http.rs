//! A standby with a single app.

use std::sync::Arc;

use async_trait::async_trait;

use failsafe_core::{ActivationRequest, Clock, RetryPolicy};

use crate::adapter::{Activation, ProviderAdapter, ProviderStatus};
use crate::endpoint::StandbyEndpoint;
use crate::error::ActivationError;

pub struct HttpStandby {
    name: String,
    endpoint: StandbyEndpoint,
    poll: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl HttpStandby {
    /// `poll` bounds the health checks after `/activate`.
    pub fn new(name: &str, endpoint: StandbyEndpoint, poll: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            endpoint,
            poll,
            clock,
        }
    }

    pub fn endpoint(&self) -> &StandbyEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ProviderAdapter for HttpStandby {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&self, request: &ActivationRequest) -> Result<Activation, ActivationError> {
        let result = self
            .endpoint
            .activate(request, &self.poll, self.clock.as_ref())
            .await?;
        Ok(Activation::single(&self.name, result))
    }

    async fn deactivate(&self) -> Result<(), ActivationError> {
        self.endpoint.deactivate().await
    }

    async fn suspend(&self) -> Result<(), ActivationError> {
        self.endpoint.suspend().await
    }

    async fn status(&self) -> ProviderStatus {
        let health = self.endpoint.health().await;
        ProviderStatus {
            provider: self.name.clone(),
            active: health.serving,
            healthy: Some(health.healthy),
            instances: self.endpoint.instances().await,
            detail: Some(self.endpoint.url().to_string()),
        }
    }
}
