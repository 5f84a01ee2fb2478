//! Several independently deployable apps behind one logical provider.
//!
//! Apps are activated one after another. Activation reports every app's
//! outcome and succeeds when at least one app came up; only a total
//! failure is an error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use failsafe_core::{ActivationRequest, Clock, RetryPolicy};

use crate::adapter::{Activation, AppOutcome, AppResult, ProviderAdapter, ProviderStatus};
use crate::endpoint::StandbyEndpoint;
use crate::error::ActivationError;

pub struct CompositeStandby {
    name: String,
    apps: Vec<StandbyEndpoint>,
    poll: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl CompositeStandby {
    pub fn new(name: &str, apps: Vec<StandbyEndpoint>, poll: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            apps,
            poll,
            clock,
        }
    }

    pub fn apps(&self) -> &[StandbyEndpoint] {
        &self.apps
    }
}

#[async_trait]
impl ProviderAdapter for CompositeStandby {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&self, request: &ActivationRequest) -> Result<Activation, ActivationError> {
        let mut outcomes = Vec::with_capacity(self.apps.len());

        for app in &self.apps {
            let result = match app.activate(request, &self.poll, self.clock.as_ref()).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(provider = %self.name, app = %app.name(), error = %e, "app activation failed");
                    AppResult::Failed(e.to_string())
                }
            };
            outcomes.push(AppOutcome {
                app: app.name().to_string(),
                result,
            });
        }

        let activation = Activation {
            provider: self.name.clone(),
            apps: outcomes,
        };

        if activation.activated() == 0 {
            let failures = activation
                .apps
                .iter()
                .filter_map(|a| match &a.result {
                    AppResult::Failed(e) => Some(format!("{}: {e}", a.app)),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ActivationError::NoAppsActivated {
                attempted: activation.total(),
                failures,
            });
        }

        info!(provider = %self.name, summary = %activation.summary(), "composite activation finished");
        Ok(activation)
    }

    async fn deactivate(&self) -> Result<(), ActivationError> {
        let mut failed = Vec::new();
        for app in &self.apps {
            if let Err(e) = app.deactivate().await {
                warn!(provider = %self.name, app = %app.name(), error = %e, "app deactivation failed");
                failed.push(app.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ActivationError::DeactivationIncomplete { failed })
        }
    }

    async fn suspend(&self) -> Result<(), ActivationError> {
        let mut failed = Vec::new();
        for app in &self.apps {
            if let Err(e) = app.suspend().await {
                warn!(provider = %self.name, app = %app.name(), error = %e, "app suspend failed");
                failed.push(app.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ActivationError::DeactivationIncomplete { failed })
        }
    }

    async fn status(&self) -> ProviderStatus {
        let mut serving = 0;
        let mut healthy = 0;
        let mut instances: Option<u32> = None;

        for app in &self.apps {
            let health = app.health().await;
            serving += usize::from(health.serving);
            healthy += usize::from(health.healthy);
            if let Some(count) = app.instances().await {
                instances = Some(instances.unwrap_or(0).saturating_add(count));
            }
        }

        ProviderStatus {
            provider: self.name.clone(),
            active: serving > 0,
            healthy: Some(healthy == self.apps.len()),
            instances,
            detail: Some(format!("{serving} of {} apps serving", self.apps.len())),
        }
    }
}
