//! Transports that move one source path to durable storage.
//!
//! ```text
//!   source path ──► SyncTransport::push ──► <destination>/<basename>
//!                        │
//!          ┌─────────────┴──────────────┐
//!   DirectoryTransport            CommandTransport
//!   (file://, mounted dirs)       (gsutil / aws / rclone)
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::exclude::ExcludeRules;
use crate::storage::StorageUri;

/// What a push moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub paths_pushed: u32,
    /// Files copied; zero when an external tool did the work.
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_skipped: u64,
}

impl SyncStats {
    pub fn absorb(&mut self, other: SyncStats) {
        self.paths_pushed += other.paths_pushed;
        self.files_copied += other.files_copied;
        self.bytes_copied += other.bytes_copied;
        self.files_skipped += other.files_skipped;
    }
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Copy `source` (file or directory) to `destination/<basename>`.
    async fn push(
        &self,
        source: &Path,
        destination: &StorageUri,
        excludes: &ExcludeRules,
    ) -> Result<SyncStats, SyncError>;
}

/// The transport able to reach `destination`.
pub fn transport_for(destination: &StorageUri) -> Arc<dyn SyncTransport> {
    match destination {
        StorageUri::Directory { .. } => Arc::new(DirectoryTransport),
        _ => Arc::new(CommandTransport::default()),
    }
}

fn basename(source: &Path) -> Result<String, SyncError> {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| SyncError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })
}

// ── Directory transport ────────────────────────────────────────

/// Plain filesystem copy into a local or mounted directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryTransport;

#[async_trait]
impl SyncTransport for DirectoryTransport {
    async fn push(
        &self,
        source: &Path,
        destination: &StorageUri,
        excludes: &ExcludeRules,
    ) -> Result<SyncStats, SyncError> {
        let StorageUri::Directory { path } = destination else {
            return Err(SyncError::InvalidDestination(destination.to_string()));
        };

        let target = path.join(basename(source)?);
        let source = source.to_path_buf();
        let excludes = excludes.clone();

        let stats = tokio::task::spawn_blocking(move || copy_tree(&source, &target, &excludes))
            .await
            .map_err(|e| SyncError::Io {
                path: path.clone(),
                source: std::io::Error::other(e.to_string()),
            })??;

        debug!(
            destination = %destination,
            files = stats.files_copied,
            skipped = stats.files_skipped,
            "directory push complete"
        );
        Ok(stats)
    }
}

fn copy_tree(source: &Path, target: &Path, excludes: &ExcludeRules) -> Result<SyncStats, SyncError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| SyncError::Io { path, source }
    };

    let mut stats = SyncStats {
        paths_pushed: 1,
        ..SyncStats::default()
    };

    if source.is_file() {
        let name = PathBuf::from(basename(source)?);
        if excludes.is_excluded(&name, false) {
            stats.files_skipped += 1;
            return Ok(stats);
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io(parent))?;
        }
        stats.bytes_copied += std::fs::copy(source, target).map_err(io(target))?;
        stats.files_copied += 1;
        return Ok(stats);
    }

    let walker = WalkDir::new(source).follow_links(false).into_iter();
    let walker = walker.filter_entry(|entry| {
        let Ok(relative) = entry.path().strip_prefix(source) else {
            return true;
        };
        // Pruned directories are never descended into.
        !(entry.file_type().is_dir() && excludes.is_excluded(relative, true))
    });

    for entry in walker {
        let entry = entry.map_err(|e| SyncError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| SyncError::Io {
                path: entry.path().to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })?;
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination).map_err(io(&destination))?;
        } else if entry.file_type().is_file() {
            if excludes.is_excluded(relative, false) {
                stats.files_skipped += 1;
                continue;
            }
            stats.bytes_copied += std::fs::copy(entry.path(), &destination).map_err(io(&destination))?;
            stats.files_copied += 1;
        }
    }

    Ok(stats)
}

// ── Command transport ──────────────────────────────────────────

/// Shells out to the cloud CLI matching the destination scheme.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    pub gsutil: String,
    pub aws: String,
    pub rclone: String,
}

impl Default for CommandTransport {
    fn default() -> Self {
        Self {
            gsutil: "gsutil".to_string(),
            aws: "aws".to_string(),
            rclone: "rclone".to_string(),
        }
    }
}

impl CommandTransport {
    /// Program and arguments that copy `source` to `destination/<basename>`.
    pub fn command_for(
        &self,
        source: &Path,
        is_dir: bool,
        destination: &StorageUri,
        excludes: &ExcludeRules,
    ) -> Result<(String, Vec<String>), SyncError> {
        let target = destination.child(&basename(source)?).to_string();
        let source = source.display().to_string();

        let command = match (destination, is_dir) {
            (StorageUri::Gcs { .. }, true) => {
                let mut args = vec!["-m".into(), "rsync".into(), "-r".into()];
                let regex = excludes.path_regex();
                if !regex.is_empty() {
                    args.extend(["-x".to_string(), regex]);
                }
                args.extend([source, target]);
                (self.gsutil.clone(), args)
            }
            (StorageUri::Gcs { .. }, false) => {
                (self.gsutil.clone(), vec!["cp".into(), source, target])
            }
            (StorageUri::S3 { .. }, true) => {
                let mut args = vec!["s3".into(), "sync".into(), source, target];
                for glob in excludes.path_globs() {
                    args.extend(["--exclude".to_string(), glob]);
                }
                (self.aws.clone(), args)
            }
            (StorageUri::S3 { .. }, false) => {
                (self.aws.clone(), vec!["s3".into(), "cp".into(), source, target])
            }
            (StorageUri::Rclone { .. }, true) => {
                let mut args = vec!["copy".into(), source, target];
                for glob in excludes.path_globs() {
                    args.extend(["--exclude".to_string(), glob]);
                }
                (self.rclone.clone(), args)
            }
            (StorageUri::Rclone { .. }, false) => {
                (self.rclone.clone(), vec!["copyto".into(), source, target])
            }
            (StorageUri::Directory { .. }, _) => {
                return Err(SyncError::InvalidDestination(format!(
                    "{destination} needs the directory transport"
                )));
            }
        };
        Ok(command)
    }
}

#[async_trait]
impl SyncTransport for CommandTransport {
    async fn push(
        &self,
        source: &Path,
        destination: &StorageUri,
        excludes: &ExcludeRules,
    ) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats {
            paths_pushed: 1,
            ..SyncStats::default()
        };

        if source.is_file() && excludes.is_excluded(Path::new(&basename(source)?), false) {
            stats.files_skipped += 1;
            return Ok(stats);
        }

        let (program, args) = self.command_for(source, source.is_dir(), destination, excludes)?;
        info!(%program, source = %source.display(), %destination, "pushing state");

        // Dropping the future (attempt timeout) kills the child.
        let output = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SyncError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(500).collect();
            return Err(SyncError::Command {
                program,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ExcludeRules {
        ExcludeRules::with_defaults(&[]).unwrap()
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn directory_push_skips_runtime_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let state = src.path().join("state");
        write(&state.join("positions.json"), "{}");
        write(&state.join("wallet/ledger.db"), "rows");
        write(&state.join("engine.pid"), "42");
        write(&state.join("logs/today.txt"), "noise");

        let destination = StorageUri::Directory {
            path: dst.path().to_path_buf(),
        };
        let stats = DirectoryTransport
            .push(&state, &destination, &rules())
            .await
            .unwrap();

        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.files_skipped, 1);
        let out = dst.path().join("state");
        assert!(out.join("positions.json").exists());
        assert!(out.join("wallet/ledger.db").exists());
        assert!(!out.join("engine.pid").exists());
        assert!(!out.join("logs").exists());
    }

    #[tokio::test]
    async fn directory_push_copies_single_file() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let file = src.path().join("config.json");
        write(&file, "{\"a\":1}");

        let destination = StorageUri::Directory {
            path: dst.path().join("nested"),
        };
        let stats = DirectoryTransport
            .push(&file, &destination, &rules())
            .await
            .unwrap();

        assert_eq!(stats.files_copied, 1);
        let copied = std::fs::read_to_string(dst.path().join("nested/config.json")).unwrap();
        assert_eq!(copied, "{\"a\":1}");
    }

    #[tokio::test]
    async fn directory_transport_rejects_remote_destination() {
        let src = tempfile::tempdir().unwrap();
        let destination = StorageUri::parse("gs://bucket/state").unwrap();
        let err = DirectoryTransport
            .push(src.path(), &destination, &rules())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidDestination(_)));
    }

    #[test]
    fn gcs_directory_uses_rsync_with_exclusions() {
        let destination = StorageUri::parse("gs://bucket/state").unwrap();
        let (program, args) = CommandTransport::default()
            .command_for(Path::new("/srv/trader/data"), true, &destination, &rules())
            .unwrap();

        assert_eq!(program, "gsutil");
        assert_eq!(&args[..3], &["-m", "rsync", "-r"]);
        assert_eq!(args[3], "-x");
        assert_eq!(args[5], "/srv/trader/data");
        assert_eq!(args[6], "gs://bucket/state/data");
    }

    #[test]
    fn s3_and_rclone_pass_globs() {
        let transport = CommandTransport::default();
        let (program, args) = transport
            .command_for(
                Path::new("/srv/data"),
                true,
                &StorageUri::parse("s3://bucket").unwrap(),
                &rules(),
            )
            .unwrap();
        assert_eq!(program, "aws");
        assert_eq!(args[3], "s3://bucket/data");
        assert!(args.windows(2).any(|w| w[0] == "--exclude" && w[1] == "*.pid"));

        let (program, args) = transport
            .command_for(
                Path::new("/srv/settings.json"),
                false,
                &StorageUri::parse("drive:backup").unwrap(),
                &rules(),
            )
            .unwrap();
        assert_eq!(program, "rclone");
        assert_eq!(args, vec!["copyto", "/srv/settings.json", "drive:backup/settings.json"]);
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let src = tempfile::tempdir().unwrap();
        let transport = CommandTransport {
            gsutil: "false".to_string(),
            ..CommandTransport::default()
        };
        let destination = StorageUri::parse("gs://bucket/state").unwrap();
        let err = transport
            .push(src.path(), &destination, &rules())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Command { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let src = tempfile::tempdir().unwrap();
        let transport = CommandTransport {
            rclone: "/nonexistent/rclone".to_string(),
            ..CommandTransport::default()
        };
        let destination = StorageUri::parse("remote:state").unwrap();
        let err = transport
            .push(src.path(), &destination, &rules())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Spawn { .. }));
    }
}
