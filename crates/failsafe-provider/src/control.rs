//! Provider control APIs: suspend, resume and scale the compute behind a
//! standby so an idle standby costs nothing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{snippet, ControlError};

pub const RENDER_API_BASE: &str = "https://api.render.com";
pub const FLY_API_BASE: &str = "https://api.machines.dev";

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn suspend(&self) -> Result<(), ControlError>;
    async fn resume(&self) -> Result<(), ControlError>;
    /// Set the number of running instances. Zero stops billing.
    async fn scale(&self, count: u32) -> Result<(), ControlError>;
    async fn instance_count(&self) -> Result<u32, ControlError>;
}

/// Bearer-authenticated JSON calls shared by both control planes.
#[derive(Clone)]
struct ControlClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl ControlClient {
    fn new(http: reqwest::Client, base: &str, token: String) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Value, ControlError> {
        let response = request
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| ControlError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ControlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ControlError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Value, ControlError> {
        let url = format!("{}{path}", self.base);
        self.send(self.http.get(&url), &url).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ControlError> {
        let url = format!("{}{path}", self.base);
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request, &url).await
    }
}

// ── Render ─────────────────────────────────────────────────────────

/// Render services API, keyed by service id.
pub struct RenderControl {
    client: ControlClient,
    service_id: String,
}

impl RenderControl {
    pub fn new(http: reqwest::Client, base: Option<&str>, token: String, service_id: &str) -> Self {
        Self {
            client: ControlClient::new(http, base.unwrap_or(RENDER_API_BASE), token),
            service_id: service_id.to_string(),
        }
    }

    fn path(&self, action: &str) -> String {
        if action.is_empty() {
            format!("/v1/services/{}", self.service_id)
        } else {
            format!("/v1/services/{}/{action}", self.service_id)
        }
    }
}

#[async_trait]
impl ControlPlane for RenderControl {
    async fn suspend(&self) -> Result<(), ControlError> {
        self.client.post(&self.path("suspend"), None).await?;
        info!(service = %self.service_id, "render service suspended");
        Ok(())
    }

    async fn resume(&self) -> Result<(), ControlError> {
        self.client.post(&self.path("resume"), None).await?;
        info!(service = %self.service_id, "render service resumed");
        Ok(())
    }

    async fn scale(&self, count: u32) -> Result<(), ControlError> {
        self.client
            .post(&self.path("scale"), Some(json!({ "numInstances": count })))
            .await?;
        info!(service = %self.service_id, count, "render service scaled");
        Ok(())
    }

    async fn instance_count(&self) -> Result<u32, ControlError> {
        let service = self.client.get(&self.path("")).await?;
        if service["suspended"].as_str() == Some("suspended") {
            return Ok(0);
        }
        let count = service["serviceDetails"]["numInstances"].as_u64().unwrap_or(1);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

// ── Fly Machines ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Machine {
    id: String,
    #[serde(default)]
    state: String,
}

impl Machine {
    fn is_running(&self) -> bool {
        matches!(self.state.as_str(), "started" | "starting")
    }
}

/// Fly Machines API, keyed by app name. Scaling starts or stops
/// existing machines; it never creates or destroys them.
pub struct FlyControl {
    client: ControlClient,
    app: String,
}

impl FlyControl {
    pub fn new(http: reqwest::Client, base: Option<&str>, token: String, app: &str) -> Self {
        Self {
            client: ControlClient::new(http, base.unwrap_or(FLY_API_BASE), token),
            app: app.to_string(),
        }
    }

    async fn machines(&self) -> Result<Vec<Machine>, ControlError> {
        let path = format!("/v1/apps/{}/machines", self.app);
        let value = self.client.get(&path).await?;
        serde_json::from_value(value).map_err(|e| ControlError::Decode {
            url: path,
            reason: e.to_string(),
        })
    }

    async fn machine_action(&self, machine: &Machine, action: &str) -> Result<(), ControlError> {
        let path = format!("/v1/apps/{}/machines/{}/{action}", self.app, machine.id);
        self.client.post(&path, None).await?;
        debug!(app = %self.app, machine = %machine.id, action, "fly machine action");
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FlyControl {
    async fn suspend(&self) -> Result<(), ControlError> {
        self.scale(0).await
    }

    async fn resume(&self) -> Result<(), ControlError> {
        if self.instance_count().await? == 0 {
            self.scale(1).await?;
        }
        Ok(())
    }

    async fn scale(&self, count: u32) -> Result<(), ControlError> {
        let machines = self.machines().await?;
        let running = machines.iter().filter(|m| m.is_running()).count();
        let target = count as usize;

        if running > target {
            for machine in machines.iter().filter(|m| m.is_running()).take(running - target) {
                self.machine_action(machine, "stop").await?;
            }
        } else if running < target {
            for machine in machines.iter().filter(|m| !m.is_running()).take(target - running) {
                self.machine_action(machine, "start").await?;
            }
        }
        info!(app = %self.app, from = running, to = count, "fly app scaled");
        Ok(())
    }

    async fn instance_count(&self) -> Result<u32, ControlError> {
        let running = self.machines().await?.iter().filter(|m| m.is_running()).count();
        Ok(u32::try_from(running).unwrap_or(u32::MAX))
    }
}
