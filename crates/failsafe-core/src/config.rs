//! failsafe.toml configuration parser.
//!
//! Durations are human strings (`"90s"`, `"5m"`). Credentials never live
//! in the file; each is named by an environment variable and resolved
//! when the adapters are built.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailsafeConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub health: HealthConfig,
    pub sync: SyncConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Consecutive unhealthy probes before failing over.
    pub failure_threshold: u32,
    /// Consecutive healthy probes before failing back.
    pub recovery_threshold: u32,
    /// Flap-prevention window after a successful activation.
    #[serde(with = "serde_duration")]
    pub cooldown: Duration,
    /// Consecutive activation failures before the breaker blocks.
    pub activation_failure_threshold: u32,
    #[serde(with = "serde_duration")]
    pub block_duration: Duration,
    #[serde(with = "serde_duration")]
    pub shutdown_timeout: Duration,
    #[serde(with = "serde_duration")]
    pub monthly_check_interval: Duration,
    pub state_dir: PathBuf,
    pub lock_path: Option<PathBuf>,
    pub requesting_host: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_threshold: 3,
            recovery_threshold: 2,
            cooldown: Duration::from_secs(90),
            activation_failure_threshold: 3,
            block_duration: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            monthly_check_interval: Duration::from_secs(3600),
            state_dir: PathBuf::from("/var/lib/failsafe"),
            lock_path: None,
            requesting_host: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("failsafed.lock"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub primary_url: String,
    pub secondary_url: Option<String>,
    /// Pattern matched against running process command lines.
    pub process_pattern: Option<String>,
    #[serde(default = "default_probe_timeout", with = "serde_duration")]
    pub timeout: Duration,
    /// Also require outbound connectivity for the primary to count as healthy.
    #[serde(default)]
    pub require_internet: bool,
    #[serde(default = "default_internet_target")]
    pub internet_target: String,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_internet_target() -> String {
    "1.1.1.1:443".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub paths: Vec<PathBuf>,
    pub destination: String,
    /// Extra glob patterns on top of the built-in exclusions.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_attempt_timeout", with = "serde_duration")]
    pub attempt_timeout: Duration,
    /// Total attempts per sync.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay", with = "serde_duration")]
    pub retry_delay: Duration,
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// The local environment; only probed, never activated remotely.
    Local,
    /// A single standby app exposing `/activate` and `/deactivate`.
    Http,
    /// Several independently deployable apps behind one logical provider.
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
    /// Standby health polls after `/activate`.
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,
    #[serde(default = "default_health_delay", with = "serde_duration")]
    pub health_delay: Duration,
    #[serde(default = "default_request_timeout", with = "serde_duration")]
    pub request_timeout: Duration,
    pub control: Option<ControlConfig>,
    pub quota: Option<QuotaConfig>,
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_delay() -> Duration {
    Duration::from_secs(6)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

/// One app of a composite provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub url: String,
    /// Falls back to the provider's `api_key_env`.
    pub api_key_env: Option<String>,
    pub control: Option<ControlConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlavor {
    Render,
    Fly,
}

/// Provider control API used to suspend, resume and scale compute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub flavor: ControlFlavor,
    /// Render service id or Fly app name.
    pub service_id: String,
    pub token_env: String,
    pub base_url: Option<String>,
}

/// Monthly free-tier quota, in compute hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub monthly_hours: f64,
    pub warning_hours: f64,
    pub switch_hours: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_hours: 750.0,
            warning_hours: 700.0,
            switch_hours: 720.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    #[serde(with = "serde_duration")]
    pub throttle: Duration,
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
    pub telegram: Option<TelegramConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(300),
            timeout: Duration::from_secs(5),
            telegram: None,
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token_env: String,
    pub chat_id: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

impl FailsafeConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: FailsafeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.health.primary_url.trim().is_empty() {
            return Err(ConfigError::Missing("health.primary_url".into()));
        }
        for (field, url) in [
            ("health.primary_url", Some(&self.health.primary_url)),
            ("health.secondary_url", self.health.secondary_url.as_ref()),
        ] {
            // Health checks speak plain HTTP/1 to the local machine only.
            if let Some(url) = url
                && !url.trim().starts_with("http://")
            {
                return Err(invalid(field, "health check URLs must use http://"));
            }
        }
        if self.sync.paths.is_empty() {
            return Err(ConfigError::Missing("sync.paths".into()));
        }
        if self.sync.destination.trim().is_empty() {
            return Err(ConfigError::Missing("sync.destination".into()));
        }

        let orch = &self.orchestrator;
        for (field, value) in [
            ("orchestrator.failure_threshold", orch.failure_threshold),
            ("orchestrator.recovery_threshold", orch.recovery_threshold),
            (
                "orchestrator.activation_failure_threshold",
                orch.activation_failure_threshold,
            ),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }

        if self.providers.len() < 2 {
            return Err(invalid(
                "providers",
                "need a primary and at least one standby",
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(invalid("providers", &format!("duplicate name {:?}", provider.name)));
            }
            provider.validate()?;
        }

        if self.providers.iter().filter(|p| p.quota.is_some()).count() > 1 {
            return Err(invalid("providers.quota", "only one provider may carry a quota"));
        }

        Ok(())
    }

    /// The first configured provider.
    pub fn primary(&self) -> &ProviderConfig {
        &self.providers[0]
    }

    /// The provider failed over to when the primary goes down.
    pub fn standby(&self) -> &ProviderConfig {
        &self.providers[1]
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// The free-tier provider whose quota resets monthly, if any.
    pub fn quota_provider(&self) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.quota.is_some())
    }
}

impl ProviderConfig {
    fn validate(&self) -> ConfigResult<()> {
        let field = |name: &str| format!("providers.{}.{name}", self.name);

        if self.name.trim().is_empty() {
            return Err(ConfigError::Missing("providers.name".into()));
        }

        match self.kind {
            ProviderKind::Local => {}
            ProviderKind::Http => {
                if self.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(ConfigError::Missing(field("url")));
                }
                if self.api_key_env.is_none() {
                    return Err(ConfigError::Missing(field("api_key_env")));
                }
            }
            ProviderKind::Composite => {
                if self.apps.is_empty() {
                    return Err(ConfigError::Missing(field("apps")));
                }
                for app in &self.apps {
                    if app.url.trim().is_empty() {
                        return Err(ConfigError::Missing(field(&format!("apps.{}.url", app.name))));
                    }
                    if app.api_key_env.is_none() && self.api_key_env.is_none() {
                        return Err(ConfigError::Missing(field(&format!(
                            "apps.{}.api_key_env",
                            app.name
                        ))));
                    }
                }
            }
        }

        if let Some(quota) = &self.quota
            && !(quota.warning_hours <= quota.switch_hours
                && quota.switch_hours <= quota.monthly_hours)
        {
            return Err(invalid(
                &field("quota"),
                "expected warning_hours <= switch_hours <= monthly_hours",
            ));
        }

        Ok(())
    }
}

/// Resolve a credential named by an environment variable.
///
/// `lookup` is `std::env::var` in production and a map in tests.
pub fn resolve_secret(
    var: &str,
    field: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> ConfigResult<String> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingSecret {
            var: var.to_string(),
            field: field.to_string(),
        }),
    }
}

/// `std::env::var` shaped for [`resolve_secret`].
pub fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
