//! Alert channels.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::AlertError;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One state transition worth telling a human about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            level,
            message: message.into(),
            at,
        }
    }

    /// Plain text rendering used by chat channels.
    pub fn text(&self) -> String {
        format!("[failsafe] {}: {}", self.level, self.message)
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Channel name; throttling is keyed by it.
    fn channel(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

async fn post_json(
    http: &reqwest::Client,
    channel: &str,
    url: &str,
    body: &serde_json::Value,
) -> Result<(), AlertError> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| AlertError::Request {
            channel: channel.to_string(),
            reason: e.without_url().to_string(),
        })?;
    if !response.status().is_success() {
        return Err(AlertError::Status {
            channel: channel.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(())
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramSink {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(http: reqwest::Client, api_base: Option<&str>, token: String, chat_id: &str) -> Self {
        Self {
            http,
            api_base: api_base.unwrap_or(TELEGRAM_API_BASE).trim_end_matches('/').to_string(),
            token,
            chat_id: chat_id.to_string(),
        }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn channel(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        // The token is part of the path; errors are reported without the URL.
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = json!({ "chat_id": self.chat_id, "text": alert.text() });
        post_json(&self.http, self.channel(), &url, &body).await
    }
}

/// Generic JSON webhook: `{"level", "message", "at", "text"}`.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let body = json!({
            "level": alert.level,
            "message": alert.message,
            "at": alert.at,
            "text": alert.text(),
        });
        post_json(&self.http, self.channel(), &self.url, &body).await
    }
}
