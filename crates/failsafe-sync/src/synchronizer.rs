//! Bounded-retry state synchronization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use failsafe_core::config::SyncConfig;
use failsafe_core::{retry_with_timeout, Clock, RetryPolicy};

use crate::error::SyncError;
use crate::exclude::ExcludeRules;
use crate::storage::StorageUri;
use crate::transport::{transport_for, SyncStats, SyncTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One sync request. Lives for a single failover attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncJob {
    pub source_paths: Vec<PathBuf>,
    pub destination: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: SyncStatus,
}

impl SyncJob {
    pub fn new(source_paths: Vec<PathBuf>, destination: &StorageUri, max_attempts: u32) -> Self {
        Self {
            source_paths,
            destination: destination.to_string(),
            attempt: 0,
            max_attempts: max_attempts.max(1),
            status: SyncStatus::Pending,
        }
    }
}

/// Result of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub job: SyncJob,
    pub stats: SyncStats,
    /// Configured paths that did not exist and were skipped.
    pub missing: Vec<PathBuf>,
}

pub struct StateSynchronizer {
    paths: Vec<PathBuf>,
    destination: StorageUri,
    excludes: ExcludeRules,
    policy: RetryPolicy,
    transport: Arc<dyn SyncTransport>,
    clock: Arc<dyn Clock>,
}

impl StateSynchronizer {
    pub fn from_config(config: &SyncConfig, clock: Arc<dyn Clock>) -> Result<Self, SyncError> {
        let destination = StorageUri::parse(&config.destination)?;
        let transport = transport_for(&destination);
        Ok(Self {
            paths: config.paths.clone(),
            excludes: ExcludeRules::with_defaults(&config.exclude)?,
            policy: RetryPolicy::fixed(config.max_retries, config.retry_delay, config.attempt_timeout),
            destination,
            transport,
            clock,
        })
    }

    /// Replace the transport chosen from the destination scheme.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn destination(&self) -> &StorageUri {
        &self.destination
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sync the configured paths to the configured destination.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        self.sync_paths(&self.paths, &self.destination).await
    }

    /// Push every existing path in `paths` to `destination`.
    ///
    /// Each attempt pushes all paths and is cut off by the policy's
    /// attempt timeout. Never retries more than `max_attempts` times.
    pub async fn sync_paths(
        &self,
        paths: &[PathBuf],
        destination: &StorageUri,
    ) -> Result<SyncReport, SyncError> {
        let (existing, missing): (Vec<PathBuf>, Vec<PathBuf>) =
            paths.iter().cloned().partition(|p| p.exists());
        for path in &missing {
            warn!(path = %path.display(), "sync source does not exist, skipping");
        }
        if existing.is_empty() {
            return Err(SyncError::NothingToSync);
        }

        let mut job = SyncJob::new(existing, destination, self.policy.max_attempts);
        job.status = SyncStatus::Running;
        info!(
            destination = %destination,
            paths = job.source_paths.len(),
            max_attempts = job.max_attempts,
            "state sync started"
        );

        let sources = &job.source_paths;
        let result = retry_with_timeout(&self.policy, self.clock.as_ref(), "state sync", |_| {
            self.push_all(sources, destination)
        })
        .await;

        match result {
            Ok(outcome) => {
                job.attempt = outcome.attempts;
                job.status = SyncStatus::Succeeded;
                info!(
                    destination = %destination,
                    attempts = outcome.attempts,
                    files = outcome.value.files_copied,
                    "state sync complete"
                );
                Ok(SyncReport {
                    job,
                    stats: outcome.value,
                    missing,
                })
            }
            Err(e) => {
                job.attempt = e.attempts;
                job.status = SyncStatus::Failed;
                warn!(destination = %destination, attempts = e.attempts, error = %e.last, "state sync failed");
                Err(SyncError::Exhausted {
                    attempts: e.attempts,
                    last: e.last.to_string(),
                })
            }
        }
    }

    async fn push_all(&self, sources: &[PathBuf], destination: &StorageUri) -> Result<SyncStats, SyncError> {
        let mut total = SyncStats::default();
        for source in sources {
            let stats = self.push_one(source, destination).await?;
            total.absorb(stats);
        }
        Ok(total)
    }

    async fn push_one(&self, source: &Path, destination: &StorageUri) -> Result<SyncStats, SyncError> {
        self.transport.push(source, destination, &self.excludes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use failsafe_core::ManualClock;

    /// Fails the first `failures` pushes, optionally hanging instead.
    struct FlakyTransport {
        calls: AtomicU32,
        failures: u32,
        hang: bool,
    }

    impl FlakyTransport {
        fn new(failures: u32, hang: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
                hang,
            })
        }
    }

    #[async_trait]
    impl SyncTransport for FlakyTransport {
        async fn push(
            &self,
            _source: &Path,
            _destination: &StorageUri,
            _excludes: &ExcludeRules,
        ) -> Result<SyncStats, SyncError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.hang {
                    std::future::pending::<()>().await;
                }
                return Err(SyncError::Command {
                    program: "gsutil".into(),
                    status: "exit status: 1".into(),
                    stderr: "storage partition".into(),
                });
            }
            Ok(SyncStats {
                paths_pushed: 1,
                files_copied: 1,
                ..SyncStats::default()
            })
        }
    }

    fn config(paths: Vec<PathBuf>) -> SyncConfig {
        SyncConfig {
            paths,
            destination: "gs://bucket/state".to_string(),
            exclude: vec![],
            attempt_timeout: Duration::from_millis(200),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn persistent_failure_tries_exactly_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FlakyTransport::new(u32::MAX, false);
        let clock = clock();
        let sync = StateSynchronizer::from_config(&config(vec![dir.path().to_path_buf()]), clock.clone())
            .unwrap()
            .with_transport(transport.clone());

        let err = sync.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Exhausted { attempts: 3, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        // Two delays between three attempts.
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 10).unwrap());
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FlakyTransport::new(1, false);
        let sync = StateSynchronizer::from_config(&config(vec![dir.path().to_path_buf()]), clock())
            .unwrap()
            .with_transport(transport.clone());

        let report = sync.sync().await.unwrap();
        assert_eq!(report.job.attempt, 2);
        assert_eq!(report.job.status, SyncStatus::Succeeded);
        assert_eq!(report.stats.files_copied, 1);
    }

    #[tokio::test]
    async fn hanging_push_is_cut_off_by_attempt_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FlakyTransport::new(u32::MAX, true);
        let sync = StateSynchronizer::from_config(&config(vec![dir.path().to_path_buf()]), clock())
            .unwrap()
            .with_transport(transport.clone());

        let started = std::time::Instant::now();
        let err = sync.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Exhausted { attempts: 3, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("state");
        std::fs::create_dir(&present).unwrap();
        let absent = dir.path().join("gone");

        let sync = StateSynchronizer::from_config(&config(vec![present.clone(), absent.clone()]), clock())
            .unwrap()
            .with_transport(FlakyTransport::new(0, false));

        let report = sync.sync().await.unwrap();
        assert_eq!(report.job.source_paths, vec![present]);
        assert_eq!(report.missing, vec![absent]);
    }

    #[tokio::test]
    async fn nothing_to_sync_when_all_paths_missing() {
        let transport = FlakyTransport::new(0, false);
        let sync = StateSynchronizer::from_config(&config(vec![PathBuf::from("/nonexistent/state")]), clock())
            .unwrap()
            .with_transport(transport.clone());

        assert!(matches!(sync.sync().await.unwrap_err(), SyncError::NothingToSync));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn directory_destination_round_trip() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("positions.json"), "{}").unwrap();
        std::fs::write(src.path().join("trader.lock"), "").unwrap();

        let mut cfg = config(vec![src.path().to_path_buf()]);
        cfg.destination = dst.path().display().to_string();
        cfg.attempt_timeout = Duration::from_secs(10);
        let sync = StateSynchronizer::from_config(&cfg, clock()).unwrap();

        let report = sync.sync().await.unwrap();
        assert_eq!(report.stats.files_copied, 1);
        let name = src.path().file_name().unwrap();
        assert!(dst.path().join(name).join("positions.json").exists());
        assert!(!dst.path().join(name).join("trader.lock").exists());
    }

    #[test]
    fn invalid_destination_is_rejected() {
        let mut cfg = config(vec![]);
        cfg.destination = "not a uri".to_string();
        assert!(StateSynchronizer::from_config(&cfg, clock()).is_err());
    }
}
