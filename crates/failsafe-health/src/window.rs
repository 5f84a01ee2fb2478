//! Consecutive probe result tracking.

use chrono::{DateTime, Utc};
use serde::Serialize;

use failsafe_core::HealthStatus;

/// Trailing run lengths of unhealthy and healthy probes.
///
/// `consecutive_failures` is always the length of the current trailing
/// run of unhealthy results; any healthy result resets it to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureWindow {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl FailureWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe result and return the current failure run length.
    pub fn record(&mut self, status: &HealthStatus) -> u32 {
        if status.reachable {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.last_success_at = Some(status.observed_at);
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(status.observed_at);
        }
        self.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }
}
