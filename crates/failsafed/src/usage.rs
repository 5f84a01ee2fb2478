//! Free-tier hour accounting for the quota-tracked provider.

use chrono::{DateTime, Utc};
use tracing::debug;

use failsafe_core::clock::elapsed_between;
use failsafe_core::config::QuotaConfig;
use failsafe_core::UsageStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum UsageAction {
    Nothing,
    /// Crossed the warning threshold for the first time this month.
    Warn { hours_used: f64 },
    /// Crossed the switch threshold: move to `to` before the quota runs out.
    Switch { to: String, hours_used: f64 },
}

#[derive(Debug, Clone)]
pub struct UsageTracker {
    provider: String,
    quota: QuotaConfig,
    /// Where to go when the free tier is nearly exhausted.
    fallback: Option<String>,
}

impl UsageTracker {
    pub fn new(provider: &str, quota: QuotaConfig, fallback: Option<String>) -> Self {
        Self {
            provider: provider.to_string(),
            quota,
            fallback,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// True once this month's usage has reached the switch threshold.
    pub fn exhausted(&self, usage: &UsageStatus) -> bool {
        usage.hours_used >= self.quota.switch_hours
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Accrue time since the last check if `current` is the tracked
    /// provider, then decide whether to warn or switch.
    pub fn accrue(&self, usage: &mut UsageStatus, current: &str, now: DateTime<Utc>) -> UsageAction {
        let on_quota = current == self.provider;

        if on_quota && let Some(last) = usage.last_check {
            let hours = elapsed_between(last, now).as_secs_f64() / 3600.0;
            usage.hours_used = (usage.hours_used + hours).min(self.quota.monthly_hours);
        }
        usage.last_check = Some(now);

        if !on_quota {
            return UsageAction::Nothing;
        }
        debug!(provider = %self.provider, hours = usage.hours_used, "quota usage");

        if self.exhausted(usage)
            && let Some(to) = &self.fallback
        {
            return UsageAction::Switch {
                to: to.clone(),
                hours_used: usage.hours_used,
            };
        }

        if usage.hours_used >= self.quota.warning_hours && !usage.warned {
            usage.warned = true;
            return UsageAction::Warn {
                hours_used: usage.hours_used,
            };
        }

        UsageAction::Nothing
    }
}
