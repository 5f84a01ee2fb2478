//! One remotely activatable app.
//!
//! Wire contract:
//!
//! - `POST {url}/activate` with `X-API-Key` and a JSON [`ActivationRequest`]; 2xx accepts.
//! - `POST {url}/deactivate` with `X-API-Key`; 2xx accepts.
//! - `GET {url}/health`; 2xx is healthy, `service_status == "running"`
//!   means already serving.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use failsafe_core::{retry_with_timeout, ActivationRequest, Clock, RetryPolicy};

use crate::adapter::AppResult;
use crate::control::ControlPlane;
use crate::error::{snippet, ActivationError};

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StandbyHealth {
    pub healthy: bool,
    pub serving: bool,
}

#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    #[serde(alias = "smarttrader_status")]
    service_status: Option<String>,
}

pub struct StandbyEndpoint {
    name: String,
    url: String,
    api_key: String,
    http: reqwest::Client,
    control: Option<Arc<dyn ControlPlane>>,
}

impl StandbyEndpoint {
    pub fn new(name: &str, url: &str, api_key: String, http: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            http,
            control: None,
        }
    }

    pub fn with_control(mut self, control: Arc<dyn ControlPlane>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn control(&self) -> Option<&Arc<dyn ControlPlane>> {
        self.control.as_ref()
    }

    /// `GET /health`. Connection failures and non-2xx are unhealthy, not errors.
    pub async fn health(&self) -> StandbyHealth {
        let url = format!("{}/health", self.url);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(app = %self.name, error = %e, "standby health request failed");
                return StandbyHealth::default();
            }
        };
        if !response.status().is_success() {
            debug!(app = %self.name, status = response.status().as_u16(), "standby unhealthy");
            return StandbyHealth::default();
        }

        let body: HealthBody = response.json().await.unwrap_or_default();
        StandbyHealth {
            healthy: true,
            serving: body.service_status.as_deref() == Some("running"),
        }
    }

    /// Activate this app and poll its health.
    ///
    /// Unless `force` is set, an app that already reports serving is left
    /// alone. A configured control plane resumes and scales to one
    /// instance before the activation request.
    pub async fn activate(
        &self,
        request: &ActivationRequest,
        poll: &RetryPolicy,
        clock: &dyn Clock,
    ) -> Result<AppResult, ActivationError> {
        if !request.force && self.health().await.serving {
            info!(app = %self.name, "standby already serving, activation is a no-op");
            return Ok(AppResult::AlreadyActive);
        }

        if let Some(control) = &self.control {
            control.resume().await?;
            control.scale(1).await?;
        }

        let url = format!("{}/activate", self.url);
        self.post(&url, Some(request)).await?;
        info!(app = %self.name, force = request.force, "activation accepted, waiting for health");

        let label = format!("{} health", self.name);
        retry_with_timeout(poll, clock, &label, |_| async {
            if self.health().await.healthy {
                Ok(())
            } else {
                Err("not healthy yet")
            }
        })
        .await
        .map_err(|e| ActivationError::Unhealthy {
            app: self.name.clone(),
            attempts: e.attempts,
        })?;

        Ok(AppResult::Activated)
    }

    /// Signal the app to stop serving, then scale its compute to zero.
    ///
    /// Succeeds if billing stops: a failed `/deactivate` is tolerated when
    /// the control plane confirms scale-to-zero.
    pub async fn deactivate(&self) -> Result<(), ActivationError> {
        let url = format!("{}/deactivate", self.url);
        let signalled = self.post::<()>(&url, None).await;

        match (&self.control, signalled) {
            (Some(control), signalled) => {
                if let Err(e) = signalled {
                    warn!(app = %self.name, error = %e, "deactivate request failed, scaling to zero anyway");
                }
                control.scale(0).await?;
                info!(app = %self.name, "standby deactivated and scaled to zero");
                Ok(())
            }
            (None, Ok(())) => {
                info!(app = %self.name, "standby deactivated");
                Ok(())
            }
            (None, Err(e)) => Err(e),
        }
    }

    /// Stop serving and suspend the service on its control plane.
    pub async fn suspend(&self) -> Result<(), ActivationError> {
        let Some(control) = &self.control else {
            return self.deactivate().await;
        };
        let url = format!("{}/deactivate", self.url);
        if let Err(e) = self.post::<()>(&url, None).await {
            warn!(app = %self.name, error = %e, "deactivate before suspend failed");
        }
        control.suspend().await?;
        info!(app = %self.name, "service suspended");
        Ok(())
    }

    /// Running instances, if a control plane is configured and answers.
    pub async fn instances(&self) -> Option<u32> {
        let control = self.control.as_ref()?;
        match control.instance_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                debug!(app = %self.name, error = %e, "instance count unavailable");
                None
            }
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: Option<&T>,
    ) -> Result<(), ActivationError> {
        let mut request = self.http.post(url).header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ActivationError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ActivationError::Rejected {
            url: url.to_string(),
            status: status.as_u16(),
            body: snippet(&body),
        })
    }
}

/// HTTP client shared by a provider's endpoints.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent("failsafed/0.1")
        .build()
}
