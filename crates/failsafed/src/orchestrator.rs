//! The orchestrator loop.
//!
//! One cycle:
//!
//! ```text
//! monthly reset (hourly) ──► may force a switch, skips the breaker
//!        │
//! probe primary ──► usage accrual (quota provider) ──► may switch
//!        │
//! breaker.observe ──► Activate:   ProviderSwitch::failover
//!                     Deactivate: ProviderSwitch::failback
//!                     Hold
//! ```
//!
//! All actions run sequentially. A shutdown signal abandons the cycle in
//! progress; within `shutdown_timeout` a half-activated target is rolled
//! back and a serving standby is deactivated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use failsafe_alert::{AlertLevel, AlertNotifier};
use failsafe_core::config::{OrchestratorConfig, QuotaConfig};
use failsafe_core::{month_key, Clock, FailsafeConfig, HealthStatus, UsageStatus};
use failsafe_health::{BreakerConfig, BreakerDecision, CircuitBreaker, CircuitSnapshot, HealthProbe, Probe};
use failsafe_provider::build_adapter;
use failsafe_state::StatusStore;
use failsafe_sync::StateSynchronizer;

use crate::error::DaemonError;
use crate::monthly::{MonthlyResetHandler, ResetAction};
use crate::switch::{ProviderSwitch, SwitchError, SwitchOutcome};
use crate::usage::{UsageAction, UsageTracker};

/// What one cycle saw and did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub status: HealthStatus,
    /// `None` when a monthly reset pre-empted the breaker.
    pub decision: Option<BreakerDecision>,
    pub circuit: CircuitSnapshot,
    pub current_provider: String,
}

pub struct Orchestrator {
    interval: Duration,
    shutdown_timeout: Duration,
    probe: Arc<dyn Probe>,
    breaker: CircuitBreaker,
    switch: ProviderSwitch,
    monthly: MonthlyResetHandler,
    /// A forced monthly switch that has not succeeded yet.
    pending_reset: Option<String>,
    /// Target of an activation that has started but not returned.
    in_flight: Option<String>,
    tracker: Option<UsageTracker>,
    usage: UsageStatus,
    notifier: AlertNotifier,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// `quota` names the free-tier provider and its limits, if any.
    pub fn new(
        config: &OrchestratorConfig,
        probe: Arc<dyn Probe>,
        switch: ProviderSwitch,
        notifier: AlertNotifier,
        quota: Option<(String, QuotaConfig)>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let primary = switch.primary().to_string();
        let quota_provider = quota.as_ref().map(|(name, _)| name.clone());

        let tracker = quota.map(|(name, limits)| {
            let fallback = switch
                .provider_names()
                .into_iter()
                .find(|p| *p != primary && *p != name)
                .map(str::to_string);
            UsageTracker::new(&name, limits, fallback)
        });

        let usage = switch.store().load_usage_or_default(&month_key(clock.now()));

        Self {
            interval: config.interval,
            shutdown_timeout: config.shutdown_timeout,
            probe,
            breaker: CircuitBreaker::new(BreakerConfig::from_orchestrator(config)),
            monthly: MonthlyResetHandler::new(config.monthly_check_interval, &primary, quota_provider.as_deref()),
            pending_reset: None,
            in_flight: None,
            tracker,
            usage,
            switch,
            notifier,
            clock,
        }
    }

    /// Assemble every component from configuration. Credentials come
    /// from `lookup`.
    pub fn from_config(
        config: &FailsafeConfig,
        clock: Arc<dyn Clock>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, DaemonError> {
        let probe = Arc::new(HealthProbe::from_config(&config.health, clock.clone()));

        let mut providers = Vec::with_capacity(config.providers.len());
        for provider in &config.providers {
            providers.push(build_adapter(provider, lookup, clock.clone())?);
        }

        let synchronizer = Arc::new(StateSynchronizer::from_config(&config.sync, clock.clone())?);
        let store = StatusStore::open(&config.orchestrator.state_dir, &config.primary().name)?;
        let notifier = AlertNotifier::from_config(&config.alert, lookup, clock.clone())?;

        let requesting_host = config
            .orchestrator
            .requesting_host
            .clone()
            .or_else(|| lookup("HOSTNAME"))
            .unwrap_or_else(|| "unknown".to_string());

        let switch = ProviderSwitch::new(providers, synchronizer, store, clock.clone(), requesting_host);
        let quota = config
            .quota_provider()
            .and_then(|p| p.quota.clone().map(|q| (p.name.clone(), q)));

        Ok(Self::new(&config.orchestrator, probe, switch, notifier, quota, clock))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn switch(&self) -> &ProviderSwitch {
        &self.switch
    }

    pub fn usage(&self) -> &UsageStatus {
        &self.usage
    }

    /// Run cycles until `shutdown` flips, then deactivate any standby.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            provider = %self.switch.record().current_provider,
            "orchestrator started"
        );

        loop {
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = shutdown.changed() => {
                    info!("orchestrator shutting down, abandoning current cycle");
                    break;
                }
            };
            debug!(
                reachable = report.status.reachable,
                source = ?report.status.source,
                decision = ?report.decision,
                circuit = ?report.circuit.state,
                provider = %report.current_provider,
                "cycle complete"
            );

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.clock.sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("orchestrator shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// One probe, evaluate, act pass.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let reset = self.monthly_reset(self.clock.now()).await;

        let status = self.probe.probe().await;
        self.track_usage(status.observed_at).await;

        let decision = if reset {
            debug!("monthly reset took priority, breaker evaluation skipped");
            None
        } else {
            Some(self.evaluate(&status).await)
        };

        CycleReport {
            status,
            decision,
            circuit: self.breaker.snapshot(),
            current_provider: self.switch.record().current_provider.clone(),
        }
    }

    /// Roll back an interrupted activation and deactivate a serving
    /// standby, all bounded by `shutdown_timeout`.
    pub async fn shutdown(&mut self) {
        self.save_usage();

        let timeout = self.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wind_down()).await.is_err() {
            error!(
                provider = %self.switch.record().current_provider,
                timeout_secs = timeout.as_secs(),
                "standby deactivation on shutdown timed out"
            );
        }
    }

    async fn wind_down(&mut self) {
        if let Some(target) = self.in_flight.take() {
            warn!(%target, "activation interrupted by shutdown, rolling back");
            if let Err(e) = self.switch.abandon(&target).await {
                error!(%target, error = %e, "rolling back interrupted activation failed");
            }
        }

        if self.switch.on_primary() {
            info!("no standby serving, nothing to deactivate");
            return;
        }

        let provider = self.switch.record().current_provider.clone();
        match self.switch.failback("orchestrator shutdown").await {
            Ok(_) => info!(%provider, "standby deactivated on shutdown"),
            Err(e) => error!(%provider, error = %e, "standby deactivation on shutdown failed"),
        }
    }

    // ── Cycle steps ────────────────────────────────────────────────

    /// Returns true when a forced switch was attempted this cycle.
    async fn monthly_reset(&mut self, now: DateTime<Utc>) -> bool {
        if self.monthly.due(now)
            && let ResetAction::Reset {
                previous_month,
                month,
                switch_to,
            } = self.monthly.check(now, &mut self.usage, self.switch.record())
        {
            self.save_usage();
            if let Err(e) = self.switch.reset_month() {
                error!(error = %e, "failed to reset monthly switch counter");
            }
            self.notifier
                .notify(AlertLevel::Info, format!("monthly quota reset ({previous_month} -> {month})"))
                .await;
            self.pending_reset = switch_to;
        }

        let Some(target) = self.pending_reset.clone() else {
            return false;
        };

        self.breaker.force_close();
        self.in_flight = Some(target.clone());
        let result = self.switch.switch_to(&target, "monthly quota reset").await;
        self.in_flight = None;
        match result {
            Ok(outcome) => {
                self.pending_reset = None;
                if !outcome.noop {
                    self.notifier.notify(AlertLevel::Info, outcome.describe()).await;
                }
            }
            Err(e) => {
                warn!(%target, error = %e, "monthly reset switch failed, retrying next cycle");
            }
        }
        true
    }

    async fn track_usage(&mut self, now: DateTime<Utc>) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let action = tracker.accrue(&mut self.usage, &self.switch.record().current_provider, now);
        let provider = tracker.provider().to_string();
        self.save_usage();

        match action {
            UsageAction::Nothing => {}
            UsageAction::Warn { hours_used } => {
                self.notifier
                    .notify(
                        AlertLevel::Warning,
                        format!("{provider} has used {hours_used:.1}h of its monthly quota"),
                    )
                    .await;
            }
            UsageAction::Switch { to, hours_used } => {
                if !self.breaker.activation_allowed(now) {
                    debug!(%provider, %to, "activation blocked, quota switch deferred");
                    return;
                }
                info!(%provider, %to, hours_used, "quota threshold reached, switching provider");
                match self.activate(&to, "quota threshold reached").await {
                    Ok(outcome) => {
                        self.breaker.activation_succeeded(now);
                        self.notifier.notify(AlertLevel::Warning, outcome.describe()).await;
                    }
                    Err(e) => {
                        warn!(%to, error = %e, "quota switch failed");
                        self.activation_failed(&to, &e).await;
                    }
                }
            }
        }
    }

    async fn evaluate(&mut self, status: &HealthStatus) -> BreakerDecision {
        let on_standby = !self.switch.on_primary();
        let decision = self.breaker.observe(status, on_standby);

        match decision {
            BreakerDecision::Hold => {}
            BreakerDecision::Activate => self.fail_over().await,
            BreakerDecision::Deactivate => self.fail_back().await,
        }
        decision
    }

    /// The standby to fail over to: the default standby, unless it is the
    /// quota provider and its hours are spent.
    fn failover_target(&self) -> Option<String> {
        let default = self.switch.provider_names().get(1).map(|s| s.to_string())?;
        if let Some(tracker) = &self.tracker
            && tracker.provider() == default
            && tracker.exhausted(&self.usage)
            && let Some(fallback) = tracker.fallback()
        {
            return Some(fallback.to_string());
        }
        Some(default)
    }

    async fn fail_over(&mut self) {
        let Some(target) = self.failover_target() else {
            error!("no standby configured");
            return;
        };
        warn!(
            to = %target,
            failures = self.breaker.consecutive_failures(),
            "primary unhealthy, failing over"
        );

        match self.activate(&target, "primary unhealthy").await {
            Ok(outcome) => {
                self.breaker.activation_succeeded(self.clock.now());
                let level = if outcome.is_degraded() {
                    AlertLevel::Warning
                } else {
                    AlertLevel::Info
                };
                self.notifier.notify(level, outcome.describe()).await;
            }
            Err(e) => {
                warn!(to = %target, error = %e, "failover failed");
                self.activation_failed(&target, &e).await;
            }
        }
    }

    async fn activate(&mut self, target: &str, reason: &str) -> Result<SwitchOutcome, SwitchError> {
        self.in_flight = Some(target.to_string());
        let result = self.switch.failover(target, reason).await;
        self.in_flight = None;
        result
    }

    async fn activation_failed(&mut self, target: &str, error: &SwitchError) {
        if !self.breaker.activation_failed(self.clock.now()) {
            return;
        }
        let snapshot = self.breaker.snapshot();
        self.notifier
            .notify(
                AlertLevel::Critical,
                format!(
                    "activating {target} failed {} times, activation blocked until {}: {error}",
                    snapshot.activation_failures,
                    snapshot
                        .block_until
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                ),
            )
            .await;
    }

    async fn fail_back(&mut self) {
        match self.switch.failback("primary recovered").await {
            Ok(outcome) => {
                self.breaker.deactivated();
                self.notifier.notify(AlertLevel::Info, outcome.describe()).await;
            }
            Err(e) => warn!(error = %e, "failback failed, retrying next cycle"),
        }
    }

    fn save_usage(&self) {
        if let Err(e) = self.switch.store().save_usage(&self.usage) {
            error!(error = %e, "failed to persist usage status");
        }
    }
}
