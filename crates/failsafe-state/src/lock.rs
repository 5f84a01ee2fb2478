//! Single-instance guard.
//!
//! An exclusive, non-blocking `flock` on a well-known path is held for the
//! lifetime of the orchestrator. The lock file also carries the holder's
//! pid so `failsafed stop` knows whom to signal. The kernel drops the lock
//! when the process dies, so a crashed orchestrator never wedges startup.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::LockError;

/// Holds the orchestrator lock until dropped.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    file: File,
}

impl InstanceGuard {
    /// Try to become the single running instance.
    ///
    /// Returns [`LockError::Contended`] immediately if another process
    /// holds the lock.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if is_contention(&e) {
                let pid = read_pid_from(&mut file);
                debug!(?path, ?pid, "instance lock is held elsewhere");
                return Err(LockError::Contended {
                    path: path.to_path_buf(),
                    pid,
                });
            }
            return Err(io_err(e));
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        debug!(?path, pid = std::process::id(), "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        // Clear the pid first so `stop` never signals a recycled pid.
        if let Err(e) = self.file.set_len(0) {
            warn!(path = ?self.path, error = %e, "failed to clear pid from lock file");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = ?self.path, error = %e, "failed to release instance lock");
        }
        debug!(path = ?self.path, "instance lock released");
    }
}

/// Whether some process currently holds the lock at `path`.
pub fn is_held(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(e) => is_contention(&e),
    }
}

/// Pid recorded by the current holder, if any.
pub fn holder_pid(path: &Path) -> Option<u32> {
    let mut file = File::open(path).ok()?;
    read_pid_from(&mut file)
}

fn read_pid_from(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

fn is_contention(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failsafed.lock");

        let guard = InstanceGuard::acquire(&path).unwrap();
        let err = InstanceGuard::acquire(&path).unwrap_err();
        match err {
            LockError::Contended { pid, .. } => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected contention, got {other:?}"),
        }
        drop(guard);
    }

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failsafed.lock");

        drop(InstanceGuard::acquire(&path).unwrap());
        assert!(!is_held(&path));
        assert_eq!(holder_pid(&path), None);

        let _guard = InstanceGuard::acquire(&path).unwrap();
        assert!(is_held(&path));
        assert_eq!(holder_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/nested/failsafed.lock");
        let guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());
    }

    #[test]
    fn absent_lock_file_is_not_held() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_held(&dir.path().join("missing.lock")));
    }
}
