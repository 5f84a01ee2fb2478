//! Throttled fan-out to every configured channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use failsafe_core::clock::{add_duration, Clock};
use failsafe_core::config::{resolve_secret, AlertConfig};
use failsafe_core::{ConfigError, ConfigResult};

use crate::error::AlertError;
use crate::sink::{Alert, AlertLevel, AlertSink, TelegramSink, WebhookSink};

/// What happened to one `notify` call, per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: Vec<String>,
    pub throttled: Vec<String>,
    pub failed: Vec<String>,
}

pub struct AlertNotifier {
    sinks: Vec<Arc<dyn AlertSink>>,
    throttle: Duration,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    /// Last delivery attempt per channel.
    last_attempt: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertNotifier {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>, throttle: Duration, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sinks,
            throttle,
            timeout,
            clock,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// A notifier with no channels; alerts only reach the log.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(Vec::new(), Duration::ZERO, Duration::ZERO, clock)
    }

    pub fn from_config(
        config: &AlertConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
        clock: Arc<dyn Clock>,
    ) -> ConfigResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "alert.timeout".to_string(),
                reason: e.to_string(),
            })?;

        let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
        if let Some(telegram) = &config.telegram {
            let token = resolve_secret(&telegram.bot_token_env, "alert.telegram.bot_token_env", lookup)?;
            sinks.push(Arc::new(TelegramSink::new(
                http.clone(),
                telegram.api_base.as_deref(),
                token,
                &telegram.chat_id,
            )));
        }
        if let Some(webhook) = &config.webhook {
            sinks.push(Arc::new(WebhookSink::new(http.clone(), &webhook.url)));
        }

        Ok(Self::new(sinks, config.throttle, config.timeout, clock))
    }

    pub fn channels(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.channel()).collect()
    }

    /// Log `message` and send it to every channel outside its throttle
    /// window. Never fails.
    pub async fn notify(&self, level: AlertLevel, message: impl Into<String>) -> NotifyReport {
        let alert = Alert::new(level, message, self.clock.now());
        match level {
            AlertLevel::Info => info!(alert = %alert.message, "alert"),
            AlertLevel::Warning => warn!(alert = %alert.message, "alert"),
            AlertLevel::Critical => error!(alert = %alert.message, "alert"),
        }

        let mut report = NotifyReport::default();
        for sink in &self.sinks {
            let channel = sink.channel().to_string();
            if !self.claim(&channel, alert.at) {
                debug!(%channel, "alert throttled");
                report.throttled.push(channel);
                continue;
            }

            match self.deliver(sink.as_ref(), &alert).await {
                Ok(()) => report.delivered.push(channel),
                Err(e) => {
                    warn!(%channel, error = %e, "alert delivery failed");
                    report.failed.push(channel);
                }
            }
        }
        report
    }

    /// Record an attempt for `channel` unless one happened within the
    /// throttle window.
    fn claim(&self, channel: &str, now: DateTime<Utc>) -> bool {
        let mut last = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = last.get(channel)
            && now < add_duration(*previous, self.throttle)
        {
            return false;
        }
        last.insert(channel.to_string(), now);
        true
    }

    async fn deliver(&self, sink: &dyn AlertSink, alert: &Alert) -> Result<(), AlertError> {
        match tokio::time::timeout(self.timeout, sink.send(alert)).await {
            Ok(result) => result,
            Err(_) => Err(AlertError::Timeout {
                channel: sink.channel().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use failsafe_core::ManualClock;

    struct CountingSink {
        name: &'static str,
        sent: AtomicU32,
        fail: bool,
    }

    impl CountingSink {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        fn channel(&self) -> &str {
            self.name
        }

        async fn send(&self, _alert: &Alert) -> Result<(), AlertError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AlertError::Status {
                    channel: self.name.to_string(),
                    status: 500,
                })
            } else {
                Ok(())
            }
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn one_message_per_throttle_window() {
        let clock = clock();
        let sink = CountingSink::new("telegram", false);
        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let notifier = AlertNotifier::new(
            sinks,
            Duration::from_secs(300),
            Duration::from_secs(5),
            clock.clone(),
        );

        let report = notifier.notify(AlertLevel::Warning, "failover started").await;
        assert_eq!(report.delivered, vec!["telegram"]);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(30));
            let report = notifier.notify(AlertLevel::Warning, "flapping").await;
            assert_eq!(report.throttled, vec!["telegram"]);
        }
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(150));
        notifier.notify(AlertLevel::Info, "recovered").await;
        assert_eq!(sink.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_still_throttle() {
        let clock = clock();
        let broken = CountingSink::new("webhook", true);
        let working = CountingSink::new("telegram", false);
        let sinks: Vec<Arc<dyn AlertSink>> = vec![broken.clone(), working.clone()];
        let notifier = AlertNotifier::new(
            sinks,
            Duration::from_secs(300),
            Duration::from_secs(5),
            clock.clone(),
        );

        let report = notifier.notify(AlertLevel::Critical, "breaker blocked").await;
        assert_eq!(report.failed, vec!["webhook"]);
        assert_eq!(report.delivered, vec!["telegram"]);

        // No retry of the failed channel inside the window.
        let report = notifier.notify(AlertLevel::Critical, "breaker blocked").await;
        assert_eq!(report.throttled, vec!["webhook", "telegram"]);
        assert_eq!(broken.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_notifier_only_logs() {
        let notifier = AlertNotifier::disabled(clock());
        assert!(notifier.channels().is_empty());
        assert_eq!(notifier.notify(AlertLevel::Info, "quiet").await, NotifyReport::default());
    }

    #[test]
    fn from_config_requires_bot_token() {
        let config = AlertConfig {
            telegram: Some(failsafe_core::config::TelegramConfig {
                bot_token_env: "TELEGRAM_BOT_TOKEN".to_string(),
                chat_id: "42".to_string(),
                api_base: None,
            }),
            ..AlertConfig::default()
        };
        let err = AlertNotifier::from_config(&config, &|_| None, clock()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingSecret { .. }));

        let notifier = AlertNotifier::from_config(&config, &|_| Some("token".to_string()), clock()).unwrap();
        assert_eq!(notifier.channels(), vec!["telegram"]);
    }
}
