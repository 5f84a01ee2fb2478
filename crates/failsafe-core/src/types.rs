//! Domain types shared across Failsafe crates.
//!
//! `FailoverRecord` and `UsageStatus` are persisted as JSON and must stay
//! schema-stable: every field has a serde default so older or partially
//! written files still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a configured provider (`primary`, `standby`, `cloudrun`, ...).
pub type ProviderName = String;

/// Name used for the primary provider when nothing else is configured.
pub const PRIMARY_PROVIDER: &str = "primary";

// ── Health ─────────────────────────────────────────────────────────

/// Which signal produced a health observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSource {
    PrimaryEndpoint,
    SecondaryEndpoint,
    ProcessCheck,
    InternetCheck,
}

/// Outcome of one probe cycle against the primary environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub reachable: bool,
    pub observed_at: DateTime<Utc>,
    /// The target that decided the outcome: the first that answered when
    /// reachable, the last one tried (or the connectivity check) otherwise.
    pub source: ProbeSource,
}

impl HealthStatus {
    pub fn healthy(source: ProbeSource, at: DateTime<Utc>) -> Self {
        Self {
            reachable: true,
            observed_at: at,
            source,
        }
    }

    pub fn unhealthy(source: ProbeSource, at: DateTime<Utc>) -> Self {
        Self {
            reachable: false,
            observed_at: at,
            source,
        }
    }
}

// ── Persisted records ──────────────────────────────────────────────

/// Which provider is authoritative, as of the last confirmed switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FailoverRecord {
    pub current_provider: ProviderName,
    pub last_switch: Option<DateTime<Utc>>,
    pub switch_reason: String,
    pub switches_this_month: u32,
}

impl FailoverRecord {
    /// A record for a system that has never switched away from `primary`.
    pub fn initial(primary: &str) -> Self {
        Self {
            current_provider: primary.to_string(),
            last_switch: None,
            switch_reason: String::new(),
            switches_this_month: 0,
        }
    }

    /// Apply a confirmed switch.
    pub fn confirm_switch(&mut self, to: &str, reason: &str, at: DateTime<Utc>) {
        self.current_provider = to.to_string();
        self.last_switch = Some(at);
        self.switch_reason = reason.to_string();
        self.switches_this_month += 1;
    }

    pub fn is_on(&self, provider: &str) -> bool {
        self.current_provider == provider
    }
}

/// Monthly usage of a quota-tracked (free tier) provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UsageStatus {
    /// Calendar month the counters belong to, `YYYY-MM`.
    pub month: String,
    pub hours_used: f64,
    pub last_check: Option<DateTime<Utc>>,
    /// Whether the warning threshold alert already fired this month.
    pub warned: bool,
}

impl UsageStatus {
    pub fn for_month(month: &str) -> Self {
        Self {
            month: month.to_string(),
            ..Self::default()
        }
    }
}

/// Calendar month key (`YYYY-MM`) for a timestamp.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

// ── Activation ─────────────────────────────────────────────────────

/// Body of `POST <standby>/activate`. Built per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    /// Where the standby should pull state from (storage URI).
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub requesting_host: String,
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_tolerates_missing_fields() {
        let record: FailoverRecord = serde_json::from_str(r#"{"switch_reason":"x"}"#).unwrap();
        assert_eq!(record.current_provider, "");
        assert_eq!(record.switches_this_month, 0);
        assert!(record.last_switch.is_none());
    }

    #[test]
    fn record_ignores_unknown_fields() {
        let record: FailoverRecord =
            serde_json::from_str(r#"{"current_provider":"standby","legacy":true}"#).unwrap();
        assert_eq!(record.current_provider, "standby");
    }

    #[test]
    fn confirm_switch_updates_counters() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        let mut record = FailoverRecord::initial(PRIMARY_PROVIDER);
        record.confirm_switch("standby", "health check failed", at);

        assert!(record.is_on("standby"));
        assert_eq!(record.last_switch, Some(at));
        assert_eq!(record.switch_reason, "health check failed");
        assert_eq!(record.switches_this_month, 1);
    }

    #[test]
    fn usage_tolerates_missing_fields() {
        let usage: UsageStatus = serde_json::from_str(r#"{"month":"2025-03"}"#).unwrap();
        assert_eq!(usage.month, "2025-03");
        assert_eq!(usage.hours_used, 0.0);
        assert!(!usage.warned);
    }

    #[test]
    fn month_key_formats_year_and_month() {
        let at = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 5).unwrap();
        assert_eq!(month_key(at), "2025-04");
    }

    #[test]
    fn activation_request_wire_shape() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        let req = ActivationRequest {
            source: "gs://bucket/state".to_string(),
            timestamp: at,
            requesting_host: "trader-01".to_string(),
            force: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["source"], "gs://bucket/state");
        assert_eq!(json["requesting_host"], "trader-01");
        assert_eq!(json["force"], false);
        assert!(json["timestamp"].as_str().unwrap().starts_with("2025-03-14T12:00:00"));
    }
}
