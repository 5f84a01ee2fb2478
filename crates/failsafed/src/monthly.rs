//! MonthlyResetHandler — calendar-driven fail-back.
//!
//! Runs on a coarse schedule. When the calendar month differs from the
//! month stored in `UsageStatus`, free-tier quota has been renewed: the
//! usage counters are reset and, if a paid standby is serving, the
//! orchestrator is told to switch back to the quota-reset provider
//! regardless of breaker state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use failsafe_core::clock::elapsed_between;
use failsafe_core::{month_key, FailoverRecord, UsageStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetAction {
    /// Same month, or not due yet.
    Nothing,
    /// Month rolled over.
    Reset {
        previous_month: String,
        month: String,
        /// Provider to switch to, bypassing the breaker.
        switch_to: Option<String>,
    },
}

#[derive(Debug)]
pub struct MonthlyResetHandler {
    check_interval: Duration,
    last_check: Option<DateTime<Utc>>,
    primary: String,
    /// Where to return on a new month: the free-tier provider, or the
    /// primary when no quota is configured.
    reset_target: String,
}

impl MonthlyResetHandler {
    pub fn new(check_interval: Duration, primary: &str, quota_provider: Option<&str>) -> Self {
        Self {
            check_interval,
            last_check: None,
            primary: primary.to_string(),
            reset_target: quota_provider.unwrap_or(primary).to_string(),
        }
    }

    pub fn reset_target(&self) -> &str {
        &self.reset_target
    }

    /// Whether a check is due at `now`. The first call is always due.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.last_check
            .is_none_or(|last| elapsed_between(last, now) >= self.check_interval)
    }

    /// Compare months and reset `usage` in place on a rollover.
    pub fn check(&mut self, now: DateTime<Utc>, usage: &mut UsageStatus, record: &FailoverRecord) -> ResetAction {
        self.last_check = Some(now);

        let month = month_key(now);
        if usage.month == month {
            return ResetAction::Nothing;
        }

        let previous_month = std::mem::replace(usage, UsageStatus::for_month(&month)).month;
        usage.last_check = Some(now);

        let current = record.current_provider.as_str();
        let switch_to = (current != self.reset_target && current != self.primary)
            .then(|| self.reset_target.clone());

        info!(
            %previous_month,
            %month,
            current_provider = %current,
            switch_to = ?switch_to,
            "calendar month rolled over, usage reset"
        );
        ResetAction::Reset {
            previous_month,
            month,
            switch_to,
        }
    }
}
