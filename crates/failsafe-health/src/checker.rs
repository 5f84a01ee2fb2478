//! Health check probe logic.
//!
//! Probes the primary environment's liveness signals in order and
//! reports Healthy if any of them answers. Errors from individual
//! targets are logged at debug level and absorbed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use failsafe_core::config::HealthConfig;
use failsafe_core::{Clock, HealthStatus, ProbeSource};

use crate::error::ProbeError;

/// Anything that can produce one `HealthStatus` per cycle.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> HealthStatus;
}

/// A single liveness signal for the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// `GET url` must answer 2xx.
    Http { url: String, source: ProbeSource },
    /// A process whose command line matches `pattern` must exist.
    Process { pattern: String },
}

impl ProbeTarget {
    fn source(&self) -> ProbeSource {
        match self {
            ProbeTarget::Http { source, .. } => *source,
            ProbeTarget::Process { .. } => ProbeSource::ProcessCheck,
        }
    }
}

/// Probes the configured targets of the primary environment.
pub struct HealthProbe {
    targets: Vec<ProbeTarget>,
    /// `host:port` that must accept a TCP connection when set.
    internet_target: Option<String>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HealthProbe {
    pub fn new(
        targets: Vec<ProbeTarget>,
        internet_target: Option<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            targets,
            internet_target,
            timeout,
            clock,
        }
    }

    /// Build the probe from `[health]`: primary URL, then secondary URL,
    /// then the process check.
    pub fn from_config(config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        let mut targets = vec![ProbeTarget::Http {
            url: config.primary_url.clone(),
            source: ProbeSource::PrimaryEndpoint,
        }];
        if let Some(url) = &config.secondary_url {
            targets.push(ProbeTarget::Http {
                url: url.clone(),
                source: ProbeSource::SecondaryEndpoint,
            });
        }
        if let Some(pattern) = &config.process_pattern {
            targets.push(ProbeTarget::Process {
                pattern: pattern.clone(),
            });
        }

        let internet_target = config
            .require_internet
            .then(|| config.internet_target.clone());

        Self::new(targets, internet_target, config.timeout, clock)
    }

    async fn check(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        match target {
            ProbeTarget::Http { url, .. } => http_probe(url, self.timeout).await,
            ProbeTarget::Process { pattern } => process_probe(pattern, self.timeout).await,
        }
    }
}

#[async_trait]
impl Probe for HealthProbe {
    async fn probe(&self) -> HealthStatus {
        let mut answered = None;
        let mut last_tried = ProbeSource::PrimaryEndpoint;

        for target in &self.targets {
            last_tried = target.source();
            match self.check(target).await {
                Ok(()) => {
                    answered = Some(target.source());
                    break;
                }
                Err(e) => debug!(source = ?target.source(), error = %e, "probe target failed"),
            }
        }

        let Some(source) = answered else {
            return HealthStatus::unhealthy(last_tried, self.clock.now());
        };

        if let Some(addr) = &self.internet_target
            && let Err(e) = tcp_probe(addr, self.timeout).await
        {
            debug!(%addr, error = %e, "connectivity check failed");
            return HealthStatus::unhealthy(ProbeSource::InternetCheck, self.clock.now());
        }

        HealthStatus::healthy(source, self.clock.now())
    }
}

/// Perform an HTTP GET against `url` and require a 2xx answer.
pub async fn http_probe(url: &str, timeout: Duration) -> Result<(), ProbeError> {
    let invalid = |reason: &str| ProbeError::InvalidTarget {
        target: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: http::Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(invalid("only plain http is supported for local probes"));
    }
    let host = uri.host().ok_or_else(|| invalid("missing host"))?.to_string();
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&path)
            .header("host", &address)
            .header("user-agent", "failsafe-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(resp.status().as_u16()))
        }
    })
    .await;

    result.unwrap_or(Err(ProbeError::Timeout))
}

/// Require that `addr` accepts a TCP connection.
pub async fn tcp_probe(addr: &str, timeout: Duration) -> Result<(), ProbeError> {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Connect(e.to_string())),
        Err(_) => Err(ProbeError::Timeout),
    }
}

/// Require a running process whose command line matches `pattern`.
pub async fn process_probe(pattern: &str, timeout: Duration) -> Result<(), ProbeError> {
    let mut cmd = tokio::process::Command::new("pgrep");
    cmd.arg("-f")
        .arg(pattern)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.status()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(_)) => Err(ProbeError::ProcessMissing(pattern.to_string())),
        Ok(Err(e)) => Err(ProbeError::Request(e.to_string())),
        Err(_) => Err(ProbeError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use failsafe_core::ManualClock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()))
    }

    /// Serve `/ok` (200) and `/down` (503) on an ephemeral port.
    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn http(url: String, source: ProbeSource) -> ProbeTarget {
        ProbeTarget::Http { url, source }
    }

    #[tokio::test]
    async fn http_probe_accepts_2xx() {
        let base = spawn_server().await;
        http_probe(&format!("{base}/ok"), Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn http_probe_rejects_non_2xx() {
        let base = spawn_server().await;
        let err = http_probe(&format!("{base}/down"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_fails() {
        let err = http_probe("http://127.0.0.1:1/health", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_) | ProbeError::Timeout));
    }

    #[tokio::test]
    async fn http_probe_rejects_https_target() {
        let err = http_probe("https://example.com/health", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTarget { .. }));
    }

    #[tokio::test]
    async fn any_target_success_is_healthy() {
        let base = spawn_server().await;
        let probe = HealthProbe::new(
            vec![
                http(format!("{base}/down"), ProbeSource::PrimaryEndpoint),
                http(format!("{base}/ok"), ProbeSource::SecondaryEndpoint),
            ],
            None,
            Duration::from_secs(2),
            clock(),
        );

        let status = probe.probe().await;
        assert!(status.reachable);
        assert_eq!(status.source, ProbeSource::SecondaryEndpoint);
    }

    #[tokio::test]
    async fn all_targets_failing_is_unhealthy() {
        let base = spawn_server().await;
        let probe = HealthProbe::new(
            vec![
                http(format!("{base}/down"), ProbeSource::PrimaryEndpoint),
                http("http://127.0.0.1:1/".to_string(), ProbeSource::SecondaryEndpoint),
            ],
            None,
            Duration::from_millis(500),
            clock(),
        );

        let status = probe.probe().await;
        assert!(!status.reachable);
        assert_eq!(status.source, ProbeSource::SecondaryEndpoint);
    }

    #[tokio::test]
    async fn connectivity_failure_overrides_local_success() {
        let base = spawn_server().await;
        let probe = HealthProbe::new(
            vec![http(format!("{base}/ok"), ProbeSource::PrimaryEndpoint)],
            Some("127.0.0.1:1".to_string()),
            Duration::from_millis(500),
            clock(),
        );

        let status = probe.probe().await;
        assert!(!status.reachable);
        assert_eq!(status.source, ProbeSource::InternetCheck);
    }

    #[test]
    fn from_config_orders_targets() {
        let config = HealthConfig {
            primary_url: "http://127.0.0.1:8100/health".to_string(),
            secondary_url: Some("http://127.0.0.1:8101/health".to_string()),
            process_pattern: Some("smart_trader".to_string()),
            timeout: Duration::from_secs(3),
            require_internet: true,
            internet_target: "8.8.8.8:53".to_string(),
        };
        let probe = HealthProbe::from_config(&config, clock());
        let sources: Vec<_> = probe.targets.iter().map(ProbeTarget::source).collect();
        assert_eq!(
            sources,
            vec![
                ProbeSource::PrimaryEndpoint,
                ProbeSource::SecondaryEndpoint,
                ProbeSource::ProcessCheck
            ]
        );
        assert_eq!(probe.internet_target.as_deref(), Some("8.8.8.8:53"));
    }
}
