//! Circuit breaker — turns a stream of probe results into failover
//! decisions.
//!
//! Three independent layers of damping:
//!
//! 1. `failure_threshold` consecutive unhealthy probes before opening.
//! 2. A cooldown after every successful activation, during which no new
//!    failover is attempted and no failback happens.
//! 3. A hard block after `activation_failure_threshold` consecutive
//!    activation failures, so a broken remote API is not hammered.
//!
//! All transitions are pure functions of the observed status and the
//! caller-reported activation outcomes. The breaker lives in memory only;
//! a restart re-closes it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use failsafe_core::clock::add_duration;
use failsafe_core::config::OrchestratorConfig;
use failsafe_core::HealthStatus;

use crate::window::FailureWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    CoolingDown,
    Blocked,
}

/// What the orchestrator should do after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Hold,
    /// Sync state and activate the standby.
    Activate,
    /// The primary is back: deactivate the standby.
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive unhealthy probes before opening.
    pub failure_threshold: u32,
    /// Consecutive healthy probes before failing back.
    pub recovery_threshold: u32,
    /// Hold time after a successful activation.
    pub cooldown: Duration,
    /// Consecutive activation failures before blocking.
    pub activation_failure_threshold: u32,
    /// How long a block lasts.
    pub block_duration: Duration,
}

impl BreakerConfig {
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_threshold: config.recovery_threshold,
            cooldown: config.cooldown,
            activation_failure_threshold: config.activation_failure_threshold,
            block_duration: config.block_duration,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from_orchestrator(&OrchestratorConfig::default())
    }
}

/// Point-in-time view for logs and `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Configured failure threshold.
    pub threshold: u32,
    /// Trailing run of unhealthy probes.
    pub consecutive_failures: u32,
    /// Activation failures since the last success.
    pub activation_failures: u32,
    /// When the breaker last opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// End of the current cooldown.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// End of the current block.
    pub block_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    window: FailureWindow,
    opened_at: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    block_until: Option<DateTime<Utc>>,
    activation_failures: u32,
    last_activation_failure: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            window: FailureWindow::new(),
            opened_at: None,
            cooldown_until: None,
            block_until: None,
            activation_failures: 0,
            last_activation_failure: None,
        }
    }

    /// Feed one probe result.
    ///
    /// `on_standby` is whether a standby is currently authoritative
    /// according to the persisted record.
    pub fn observe(&mut self, status: &HealthStatus, on_standby: bool) -> BreakerDecision {
        let now = status.observed_at;
        let failures = self.window.record(status);

        match self.state {
            CircuitState::Blocked => {
                if self.block_until.is_some_and(|until| now < until) {
                    debug!(failures, "breaker blocked, skipping activation");
                    return BreakerDecision::Hold;
                }
                info!("breaker block expired");
                self.state = CircuitState::Closed;
                self.block_until = None;
                self.activation_failures = 0;
            }
            CircuitState::CoolingDown => {
                if self.cooldown_until.is_some_and(|until| now < until) {
                    return BreakerDecision::Hold;
                }
                if !status.reachable {
                    return BreakerDecision::Hold;
                }
                info!("cooldown elapsed with a healthy primary, closing breaker");
                self.state = CircuitState::Closed;
                self.cooldown_until = None;
            }
            CircuitState::Open | CircuitState::Closed => {}
        }

        if on_standby {
            if self.window.consecutive_successes() >= self.config.recovery_threshold {
                return BreakerDecision::Deactivate;
            }
            return BreakerDecision::Hold;
        }

        if status.reachable {
            if self.state == CircuitState::Open {
                info!("primary recovered before the standby was activated");
            }
            self.state = CircuitState::Closed;
            self.opened_at = None;
            return BreakerDecision::Hold;
        }

        if failures >= self.config.failure_threshold {
            if self.state != CircuitState::Open {
                warn!(
                    failures,
                    threshold = self.config.failure_threshold,
                    "failure threshold reached, opening breaker"
                );
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            return BreakerDecision::Activate;
        }

        BreakerDecision::Hold
    }

    /// The standby is serving: start the flap-prevention window.
    pub fn activation_succeeded(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::CoolingDown;
        self.cooldown_until = Some(add_duration(now, self.config.cooldown));
        self.opened_at = None;
        self.activation_failures = 0;
        info!(cooldown_secs = self.config.cooldown.as_secs(), "breaker cooling down");
    }

    /// Activation failed. Returns true if the breaker is now blocked.
    pub fn activation_failed(&mut self, now: DateTime<Utc>) -> bool {
        self.activation_failures += 1;
        self.last_activation_failure = Some(now);

        if self.activation_failures >= self.config.activation_failure_threshold {
            self.state = CircuitState::Blocked;
            self.block_until = Some(add_duration(now, self.config.block_duration));
            warn!(
                failures = self.activation_failures,
                block_secs = self.config.block_duration.as_secs(),
                "activation keeps failing, blocking further attempts"
            );
            return true;
        }

        debug!(failures = self.activation_failures, "activation failed");
        false
    }

    /// False while a block is in force. Switches made outside `observe`
    /// check this before activating anything.
    pub fn activation_allowed(&self, now: DateTime<Utc>) -> bool {
        !(self.state == CircuitState::Blocked && self.block_until.is_some_and(|until| now < until))
    }

    /// The standby was deactivated and the primary is authoritative again.
    pub fn deactivated(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.cooldown_until = None;
    }

    /// Drop cooldown and block state. Only the monthly reset uses this.
    pub fn force_close(&mut self) {
        if self.state != CircuitState::Closed {
            info!(from = ?self.state, "breaker force-closed");
        }
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.cooldown_until = None;
        self.block_until = None;
        self.activation_failures = 0;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.window.consecutive_failures()
    }

    pub fn window(&self) -> &FailureWindow {
        &self.window
    }

    pub fn last_activation_failure(&self) -> Option<DateTime<Utc>> {
        self.last_activation_failure
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            threshold: self.config.failure_threshold,
            consecutive_failures: self.window.consecutive_failures(),
            activation_failures: self.activation_failures,
            opened_at: self.opened_at,
            cooldown_until: self.cooldown_until,
            block_until: self.block_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use failsafe_core::ProbeSource;

    struct Harness {
        breaker: CircuitBreaker,
        now: DateTime<Utc>,
        on_standby: bool,
        activations: u32,
        deactivations: u32,
    }

    impl Harness {
        fn new(config: BreakerConfig) -> Self {
            Self {
                breaker: CircuitBreaker::new(config),
                now: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                on_standby: false,
                activations: 0,
                deactivations: 0,
            }
        }

        /// Probe, and if asked to act, report the given activation outcome.
        fn step(&mut self, reachable: bool, activation_ok: bool) -> BreakerDecision {
            self.now += chrono::Duration::seconds(5);
            let status = HealthStatus {
                reachable,
                observed_at: self.now,
                source: ProbeSource::PrimaryEndpoint,
            };
            let decision = self.breaker.observe(&status, self.on_standby);
            match decision {
                BreakerDecision::Activate => {
                    self.activations += 1;
                    if activation_ok {
                        self.breaker.activation_succeeded(self.now);
                        self.on_standby = true;
                    } else {
                        self.breaker.activation_failed(self.now);
                    }
                }
                BreakerDecision::Deactivate => {
                    self.deactivations += 1;
                    self.breaker.deactivated();
                    self.on_standby = false;
                }
                BreakerDecision::Hold => {}
            }
            decision
        }

        fn advance(&mut self, secs: i64) {
            self.now += chrono::Duration::seconds(secs);
        }
    }

    fn config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_threshold: 2,
            cooldown: Duration::from_secs(90),
            activation_failure_threshold: 3,
            block_duration: Duration::from_secs(300),
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(config(3));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().threshold, 3);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let mut h = Harness::new(config(3));
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
        assert_eq!(h.step(true, true), BreakerDecision::Hold);
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.breaker.consecutive_failures(), 1);
        assert_eq!(h.activations, 0);
    }

    #[test]
    fn opens_at_threshold_and_cools_down() {
        let mut h = Harness::new(config(3));
        h.step(false, true);
        h.step(false, true);
        assert_eq!(h.step(false, true), BreakerDecision::Activate);
        assert_eq!(h.breaker.state(), CircuitState::CoolingDown);
        assert!(h.breaker.snapshot().cooldown_until.is_some());
    }

    #[test]
    fn no_activation_or_failback_during_cooldown() {
        let mut h = Harness::new(config(3));
        for _ in 0..3 {
            h.step(false, true);
        }
        assert_eq!(h.activations, 1);

        // 10 healthy probes 5s apart: still inside the 90s window.
        for _ in 0..10 {
            assert_eq!(h.step(true, true), BreakerDecision::Hold);
        }
        // Unhealthy probes inside the window trigger nothing either.
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.activations, 1);
        assert_eq!(h.deactivations, 0);
    }

    #[test]
    fn fails_back_after_cooldown_and_fresh_success() {
        let mut h = Harness::new(config(3));
        for _ in 0..3 {
            h.step(false, true);
        }
        h.advance(120);

        // Cooldown elapsed but the primary is still down: keep the standby.
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.breaker.state(), CircuitState::CoolingDown);

        // Recovery needs two consecutive healthy probes.
        assert_eq!(h.step(true, true), BreakerDecision::Hold);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
        assert_eq!(h.step(true, true), BreakerDecision::Deactivate);
        assert_eq!(h.deactivations, 1);
        assert!(!h.on_standby);
    }

    #[test]
    fn repeated_activation_failures_block() {
        let mut h = Harness::new(config(3));
        h.step(false, false);
        h.step(false, false);
        assert_eq!(h.step(false, false), BreakerDecision::Activate);
        assert_eq!(h.step(false, false), BreakerDecision::Activate);
        assert_eq!(h.step(false, false), BreakerDecision::Activate);
        assert_eq!(h.breaker.state(), CircuitState::Blocked);
        assert_eq!(h.activations, 3);

        // Within the 300s block: nothing.
        for _ in 0..20 {
            assert_eq!(h.step(false, false), BreakerDecision::Hold);
        }
        assert_eq!(h.activations, 3);

        // After the block, one more unhealthy probe retries.
        h.advance(300);
        assert_eq!(h.step(false, true), BreakerDecision::Activate);
        assert_eq!(h.activations, 4);
        assert_eq!(h.breaker.state(), CircuitState::CoolingDown);
    }

    #[test]
    fn healthy_probe_while_open_closes() {
        let mut h = Harness::new(config(2));
        h.step(false, false);
        assert_eq!(h.step(false, false), BreakerDecision::Activate);
        assert_eq!(h.breaker.state(), CircuitState::Open);

        assert_eq!(h.step(true, false), BreakerDecision::Hold);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
        // Need a fresh run of failures to reopen.
        assert_eq!(h.step(false, false), BreakerDecision::Hold);
    }

    #[test]
    fn restart_on_standby_fails_back_when_healthy() {
        let mut h = Harness::new(config(3));
        h.on_standby = true;
        assert_eq!(h.step(false, true), BreakerDecision::Hold);
        assert_eq!(h.step(true, true), BreakerDecision::Hold);
        assert_eq!(h.step(true, true), BreakerDecision::Deactivate);
        assert_eq!(h.activations, 0);
    }

    #[test]
    fn force_close_clears_block() {
        let mut breaker = CircuitBreaker::new(config(1));
        let now = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 0).unwrap();
        for _ in 0..3 {
            breaker.activation_failed(now);
        }
        assert_eq!(breaker.state(), CircuitState::Blocked);

        breaker.force_close();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert!(snapshot.block_until.is_none());
        assert_eq!(snapshot.activation_failures, 0);
    }

    #[test]
    fn activation_disallowed_only_while_blocked() {
        let mut breaker = CircuitBreaker::new(config(1));
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 8, 0, 0).unwrap();
        assert!(breaker.activation_allowed(now));

        assert!(!breaker.activation_failed(now));
        assert!(!breaker.activation_failed(now));
        assert!(breaker.activation_allowed(now));
        assert!(breaker.activation_failed(now));

        assert!(!breaker.activation_allowed(now + chrono::Duration::seconds(299)));
        assert!(breaker.activation_allowed(now + chrono::Duration::seconds(300)));
    }

    #[test]
    fn never_opens_below_threshold_for_any_sequence() {
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut h = Harness::new(config(3));
        let mut trailing = 0;

        for _ in 0..1000 {
            seed ^= seed << 7;
            seed ^= seed >> 9;
            let reachable = seed % 4 == 0;
            let was_cooling = h.breaker.state() == CircuitState::CoolingDown
                && h.breaker.snapshot().cooldown_until.is_some_and(|u| h.now + chrono::Duration::seconds(5) < u);
            trailing = if reachable { 0 } else { trailing + 1 };

            let decision = h.step(reachable, seed % 2 == 0);
            if decision == BreakerDecision::Activate {
                assert!(trailing >= 3, "activated after {trailing} failures");
                assert!(!was_cooling, "activated during cooldown");
            }
        }
    }
}
