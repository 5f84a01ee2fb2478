//! ProviderSwitch — moves responsibility between providers and records
//! the result.
//!
//! ```text
//! failover(to):  sync state ─► suspend current ─► activate `to` ─► persist
//!                (non-fatal)   (non-fatal)        (must succeed;
//!                                                  on failure, current
//!                                                  is re-activated)
//! failback:      deactivate current standby ─► persist primary
//!                (must succeed)
//! ```
//!
//! The record is only written once the target is confirmed, so it never
//! names an in-flight switch.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use failsafe_core::{ActivationRequest, Clock, FailoverRecord};
use failsafe_provider::{Activation, ActivationError, ProviderAdapter};
use failsafe_state::{StateResult, StatusStore};
use failsafe_sync::{StateSynchronizer, SyncReport};

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("unknown provider {0}")]
    UnknownProvider(String),

    #[error("activating {provider} failed: {source}")]
    Activation {
        provider: String,
        #[source]
        source: ActivationError,
    },

    #[error("deactivating {provider} failed: {source}")]
    Deactivation {
        provider: String,
        #[source]
        source: ActivationError,
    },
}

/// How the pre-activation sync went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(SyncReport),
    /// The standby resumes from whatever state already exists remotely.
    Failed(String),
    NotAttempted,
}

/// A confirmed switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub sync: SyncOutcome,
    pub activation: Option<Activation>,
    /// Nothing to do: `to` was already current.
    pub noop: bool,
}

impl SwitchOutcome {
    /// Sync failed or only some apps came up.
    pub fn is_degraded(&self) -> bool {
        matches!(self.sync, SyncOutcome::Failed(_))
            || self.activation.as_ref().is_some_and(Activation::is_degraded)
    }

    pub fn describe(&self) -> String {
        let mut text = format!("switched {} -> {} ({})", self.from, self.to, self.reason);
        if let Some(activation) = &self.activation
            && activation.total() > 1
        {
            text.push_str(&format!(", {}", activation.summary()));
        }
        if let SyncOutcome::Failed(e) = &self.sync {
            text.push_str(&format!(", degraded: state sync failed ({e})"));
        }
        text
    }
}

pub struct ProviderSwitch {
    /// Index 0 is the primary.
    providers: Vec<Arc<dyn ProviderAdapter>>,
    synchronizer: Arc<StateSynchronizer>,
    store: StatusStore,
    clock: Arc<dyn Clock>,
    requesting_host: String,
    record: FailoverRecord,
}

impl ProviderSwitch {
    /// Load the persisted record; unreadable records fall back to the primary.
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        synchronizer: Arc<StateSynchronizer>,
        store: StatusStore,
        clock: Arc<dyn Clock>,
        requesting_host: String,
    ) -> Self {
        let mut record = store.load_record_or_default();
        if !providers.iter().any(|p| p.name() == record.current_provider) {
            warn!(
                provider = %record.current_provider,
                "recorded provider is not configured, assuming primary"
            );
            if let Some(primary) = providers.first() {
                record.current_provider = primary.name().to_string();
            }
        }
        info!(provider = %record.current_provider, "current provider loaded");

        Self {
            providers,
            synchronizer,
            store,
            clock,
            requesting_host,
            record,
        }
    }

    pub fn record(&self) -> &FailoverRecord {
        &self.record
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn primary(&self) -> &str {
        self.providers.first().map(|p| p.name()).unwrap_or_default()
    }

    pub fn on_primary(&self) -> bool {
        self.record.is_on(self.primary())
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn adapter(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, SwitchError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| SwitchError::UnknownProvider(name.to_string()))
    }

    /// Failover if `to` is a standby, failback if it is the primary.
    pub async fn switch_to(&mut self, to: &str, reason: &str) -> Result<SwitchOutcome, SwitchError> {
        if to == self.primary() {
            self.failback(reason).await
        } else {
            self.failover(to, reason).await
        }
    }

    /// Sync, suspend the current provider, activate `to`, persist.
    pub async fn failover(&mut self, to: &str, reason: &str) -> Result<SwitchOutcome, SwitchError> {
        let target = self.adapter(to)?;
        let from = self.record.current_provider.clone();

        if from == to {
            return Ok(self.noop(to, reason));
        }

        info!(%from, %to, %reason, "failover started");

        let sync = match self.synchronizer.sync().await {
            Ok(report) => SyncOutcome::Synced(report),
            Err(e) => {
                warn!(error = %e, "state sync failed, activating with existing remote state");
                SyncOutcome::Failed(e.to_string())
            }
        };

        // The old provider's cooperation is never required.
        let suspended = match self.adapter(&from) {
            Ok(current) => match current.suspend().await {
                Ok(()) => Some(current),
                Err(e) => {
                    warn!(provider = %from, error = %e, "suspending previous provider failed, continuing");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "previous provider unknown, not suspending");
                None
            }
        };

        let request = ActivationRequest {
            source: self.synchronizer.destination().to_string(),
            timestamp: self.clock.now(),
            requesting_host: self.requesting_host.clone(),
            force: false,
        };
        let activation = match target.activate(&request).await {
            Ok(activation) => activation,
            Err(source) => {
                if let Some(previous) = suspended {
                    restore(previous.as_ref(), &request).await;
                }
                return Err(SwitchError::Activation {
                    provider: to.to_string(),
                    source,
                });
            }
        };

        self.confirm(to, reason);
        let outcome = SwitchOutcome {
            from,
            to: to.to_string(),
            reason: reason.to_string(),
            sync,
            activation: Some(activation),
            noop: false,
        };
        info!(summary = %outcome.describe(), degraded = outcome.is_degraded(), "failover complete");
        Ok(outcome)
    }

    /// Deactivate the current standby and make the primary authoritative.
    pub async fn failback(&mut self, reason: &str) -> Result<SwitchOutcome, SwitchError> {
        let primary = self.primary().to_string();
        let from = self.record.current_provider.clone();
        if from == primary {
            return Ok(self.noop(&primary, reason));
        }

        info!(%from, to = %primary, %reason, "failback started");
        let standby = self.adapter(&from)?;
        standby
            .deactivate()
            .await
            .map_err(|source| SwitchError::Deactivation {
                provider: from.clone(),
                source,
            })?;

        self.confirm(&primary, reason);
        info!(%from, to = %primary, "failback complete");
        Ok(SwitchOutcome {
            from,
            to: primary,
            reason: reason.to_string(),
            sync: SyncOutcome::NotAttempted,
            activation: None,
            noop: false,
        })
    }

    /// Zero the monthly switch counter.
    pub fn reset_month(&mut self) -> StateResult<()> {
        self.record.switches_this_month = 0;
        self.store.save_record(&self.record)
    }

    fn confirm(&mut self, to: &str, reason: &str) {
        self.record.confirm_switch(to, reason, self.clock.now());
        // The switch happened; a failed write is retried with the next one.
        if let Err(e) = self.store.save_record(&self.record) {
            error!(error = %e, "failed to persist failover record");
        }
    }

    /// Deactivate `name` without touching the record. Used when a
    /// failover towards it was abandoned before it was confirmed.
    pub async fn abandon(&self, name: &str) -> Result<(), SwitchError> {
        if name == self.primary() || self.record.is_on(name) {
            return Ok(());
        }
        let adapter = self.adapter(name)?;
        adapter
            .deactivate()
            .await
            .map_err(|source| SwitchError::Deactivation {
                provider: name.to_string(),
                source,
            })?;
        info!(provider = %name, "abandoned activation rolled back");
        Ok(())
    }

    fn noop(&self, to: &str, reason: &str) -> SwitchOutcome {
        SwitchOutcome {
            from: to.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
            sync: SyncOutcome::NotAttempted,
            activation: None,
            noop: true,
        }
    }
}

/// Bring the suspended provider back after the new one failed to come up,
/// so the recorded provider keeps serving.
async fn restore(previous: &dyn ProviderAdapter, request: &ActivationRequest) {
    match previous.activate(request).await {
        Ok(_) => info!(provider = %previous.name(), "previous provider restored"),
        Err(e) => error!(provider = %previous.name(), error = %e, "restoring previous provider failed"),
    }
}
