//! The uniform contract every environment implements.

use async_trait::async_trait;
use serde::Serialize;

use failsafe_core::ActivationRequest;

use crate::error::ActivationError;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name as configured (`FailoverRecord::current_provider`).
    fn name(&self) -> &str;

    /// Bring the environment into service and wait until it is healthy.
    ///
    /// Activating an already-serving environment succeeds without side
    /// effects.
    async fn activate(&self, request: &ActivationRequest) -> Result<Activation, ActivationError>;

    /// Stop serving and scale compute to zero. Safe to repeat.
    async fn deactivate(&self) -> Result<(), ActivationError>;

    /// Take the environment out of service before another provider
    /// takes over. Defaults to [`deactivate`](Self::deactivate).
    async fn suspend(&self) -> Result<(), ActivationError> {
        self.deactivate().await
    }

    /// Best-effort view of the environment. Never fails.
    async fn status(&self) -> ProviderStatus;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "error")]
pub enum AppResult {
    Activated,
    AlreadyActive,
    Failed(String),
}

/// Outcome for one app of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppOutcome {
    /// App or service name as the provider reports it.
    pub app: String,
    /// What happened to that app.
    #[serde(flatten)]
    pub result: AppResult,
}

impl AppOutcome {
    pub fn is_up(&self) -> bool {
        !matches!(self.result, AppResult::Failed(_))
    }
}

/// Per-app result of a successful activation.
///
/// A composite provider with some failed apps still activates; the
/// failover is then degraded, not failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    /// Provider that was activated.
    pub provider: String,
    /// One entry per app; a single-endpoint provider has exactly one.
    pub apps: Vec<AppOutcome>,
}

impl Activation {
    pub fn single(provider: &str, result: AppResult) -> Self {
        Self {
            provider: provider.to_string(),
            apps: vec![AppOutcome {
                app: provider.to_string(),
                result,
            }],
        }
    }

    pub fn activated(&self) -> usize {
        self.apps.iter().filter(|a| a.is_up()).count()
    }

    pub fn total(&self) -> usize {
        self.apps.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.activated() < self.total()
    }

    /// Every app was already serving before the call.
    pub fn was_noop(&self) -> bool {
        self.apps
            .iter()
            .all(|a| a.result == AppResult::AlreadyActive)
    }

    /// `"2 of 3 apps activated"`.
    pub fn summary(&self) -> String {
        format!("{} of {} apps activated", self.activated(), self.total())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    /// Configured provider name.
    pub provider: String,
    /// Serving traffic, as far as the provider reports.
    pub active: bool,
    /// Health endpoint answered; `None` when there is nothing to ask.
    pub healthy: Option<bool>,
    /// Running instances reported by the control plane.
    pub instances: Option<u32>,
    /// Human-readable context, e.g. the endpoint or how many apps serve.
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(app: &str, result: AppResult) -> AppOutcome {
        AppOutcome {
            app: app.to_string(),
            result,
        }
    }

    #[test]
    fn partial_activation_is_degraded() {
        let activation = Activation {
            provider: "fly".into(),
            apps: vec![
                outcome("engine", AppResult::Activated),
                outcome("signals", AppResult::AlreadyActive),
                outcome("mesh", AppResult::Failed("503".into())),
            ],
        };
        assert_eq!(activation.activated(), 2);
        assert!(activation.is_degraded());
        assert!(!activation.was_noop());
        assert_eq!(activation.summary(), "2 of 3 apps activated");
    }

    #[test]
    fn already_active_single_is_noop() {
        let activation = Activation::single("render", AppResult::AlreadyActive);
        assert!(activation.was_noop());
        assert!(!activation.is_degraded());
    }

    #[test]
    fn outcome_serializes_flat() {
        let json = serde_json::to_value(outcome("mesh", AppResult::Failed("boom".into()))).unwrap();
        assert_eq!(json["app"], "mesh");
        assert_eq!(json["result"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
