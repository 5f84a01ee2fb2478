//! StatusStore — JSON status files with atomic replacement.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use failsafe_core::{FailoverRecord, UsageStatus};

use crate::error::{StateError, StateResult};

const RECORD_FILE: &str = "failover_record.json";
const USAGE_FILE: &str = "usage_status.json";

/// Reads and writes the persisted FailoverRecord and UsageStatus.
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
    /// Provider reported when no record exists yet.
    primary: String,
}

impl StatusStore {
    /// Open (or create) the status directory.
    pub fn open(dir: &Path, primary: &str) -> StateResult<Self> {
        fs::create_dir_all(dir).map_err(|source| StateError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        debug!(?dir, "status store opened");
        Ok(Self::at(dir, primary))
    }

    /// A store over `dir` without touching the filesystem. Used by
    /// read-only callers such as `status`, which must work even when the
    /// directory does not exist.
    pub fn at(dir: &Path, primary: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            primary: primary.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    pub fn usage_path(&self) -> PathBuf {
        self.dir.join(USAGE_FILE)
    }

    // ── FailoverRecord ─────────────────────────────────────────────

    /// Load the record. A missing file yields "primary, never switched".
    pub fn load_record(&self) -> StateResult<FailoverRecord> {
        let mut record = read_json::<FailoverRecord>(&self.record_path())?
            .unwrap_or_else(|| FailoverRecord::initial(&self.primary));
        if record.current_provider.is_empty() {
            record.current_provider = self.primary.clone();
        }
        Ok(record)
    }

    /// Like [`load_record`](Self::load_record) but never fails.
    pub fn load_record_or_default(&self) -> FailoverRecord {
        self.load_record().unwrap_or_else(|e| {
            warn!(error = %e, "failover record unreadable, reporting default");
            FailoverRecord::initial(&self.primary)
        })
    }

    /// Persist a confirmed record.
    pub fn save_record(&self, record: &FailoverRecord) -> StateResult<()> {
        write_json_atomic(&self.dir, &self.record_path(), record)?;
        debug!(provider = %record.current_provider, "failover record saved");
        Ok(())
    }

    // ── UsageStatus ────────────────────────────────────────────────

    /// Load usage. A missing file yields zero usage for `current_month`.
    pub fn load_usage(&self, current_month: &str) -> StateResult<UsageStatus> {
        Ok(read_json::<UsageStatus>(&self.usage_path())?
            .unwrap_or_else(|| UsageStatus::for_month(current_month)))
    }

    pub fn load_usage_or_default(&self, current_month: &str) -> UsageStatus {
        self.load_usage(current_month).unwrap_or_else(|e| {
            warn!(error = %e, "usage status unreadable, reporting default");
            UsageStatus::for_month(current_month)
        })
    }

    pub fn save_usage(&self, usage: &UsageStatus) -> StateResult<()> {
        write_json_atomic(&self.dir, &self.usage_path(), usage)?;
        debug!(month = %usage.month, hours = usage.hours_used, "usage status saved");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Write to a temp file next to `path`, fsync, then rename over it.
fn write_json_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> StateResult<()> {
    let write_err = |source| StateError::Write {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
