//! Durable storage URI resolution.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageUri {
    /// Google Cloud Storage: gs://bucket/prefix
    Gcs { bucket: String, prefix: String },
    /// S3: s3://bucket/prefix
    S3 { bucket: String, prefix: String },
    /// rclone remote: remote:path/inside
    Rclone { remote: String, path: String },
    /// Local or mounted directory: file:///mnt/shared or /mnt/shared
    Directory { path: PathBuf },
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self, SyncError> {
        let invalid = || SyncError::InvalidDestination(uri.to_string());

        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, prefix) = split_bucket(rest).ok_or_else(invalid)?;
            Ok(StorageUri::Gcs { bucket, prefix })
        } else if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = split_bucket(rest).ok_or_else(invalid)?;
            Ok(StorageUri::S3 { bucket, prefix })
        } else if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(invalid());
            }
            Ok(StorageUri::Directory { path: PathBuf::from(path) })
        } else if uri.starts_with('/') || uri.starts_with("./") {
            Ok(StorageUri::Directory { path: PathBuf::from(uri) })
        } else if let Some((remote, path)) = uri.split_once(':')
            && !remote.is_empty()
            && !remote.contains('/')
            && !path.starts_with("//")
        {
            Ok(StorageUri::Rclone {
                remote: remote.to_string(),
                path: path.to_string(),
            })
        } else {
            Err(invalid())
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            StorageUri::Gcs { .. } => "gs",
            StorageUri::S3 { .. } => "s3",
            StorageUri::Rclone { .. } => "rclone",
            StorageUri::Directory { .. } => "file",
        }
    }

    /// The URI with `name` appended as a child.
    pub fn child(&self, name: &str) -> StorageUri {
        let join = |base: &str| {
            if base.is_empty() {
                name.to_string()
            } else {
                format!("{}/{name}", base.trim_end_matches('/'))
            }
        };
        match self {
            StorageUri::Gcs { bucket, prefix } => StorageUri::Gcs {
                bucket: bucket.clone(),
                prefix: join(prefix),
            },
            StorageUri::S3 { bucket, prefix } => StorageUri::S3 {
                bucket: bucket.clone(),
                prefix: join(prefix),
            },
            StorageUri::Rclone { remote, path } => StorageUri::Rclone {
                remote: remote.clone(),
                path: join(path),
            },
            StorageUri::Directory { path } => StorageUri::Directory {
                path: path.join(name),
            },
        }
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageUri::Gcs { bucket, prefix } => write!(f, "gs://{bucket}/{prefix}"),
            StorageUri::S3 { bucket, prefix } => write!(f, "s3://{bucket}/{prefix}"),
            StorageUri::Rclone { remote, path } => write!(f, "{remote}:{path}"),
            StorageUri::Directory { path } => write!(f, "{}", path.display()),
        }
    }
}

fn split_bucket(rest: &str) -> Option<(String, String)> {
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return None;
    }
    Some((bucket.to_string(), prefix.trim_end_matches('/').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gcs() {
        let uri = StorageUri::parse("gs://trader-state/state/").unwrap();
        assert_eq!(
            uri,
            StorageUri::Gcs {
                bucket: "trader-state".into(),
                prefix: "state".into()
            }
        );
        assert_eq!(uri.to_string(), "gs://trader-state/state");
    }

    #[test]
    fn parse_s3_without_prefix() {
        let uri = StorageUri::parse("s3://bucket").unwrap();
        assert_eq!(uri.scheme(), "s3");
        assert_eq!(uri.child("runtime").to_string(), "s3://bucket/runtime");
    }

    #[test]
    fn parse_rclone_remote() {
        let uri = StorageUri::parse("gdrive:Trader/state").unwrap();
        assert_eq!(uri.scheme(), "rclone");
        assert_eq!(uri.child("runtime").to_string(), "gdrive:Trader/state/runtime");
    }

    #[test]
    fn parse_directory_forms() {
        assert_eq!(StorageUri::parse("file:///mnt/shared").unwrap().scheme(), "file");
        assert_eq!(StorageUri::parse("/mnt/shared").unwrap().scheme(), "file");
    }

    #[test]
    fn reject_unknown() {
        assert!(StorageUri::parse("gs://").is_err());
        assert!(StorageUri::parse("ftp/host").is_err());
        assert!(StorageUri::parse("https://example.com/state").is_err());
        assert!(StorageUri::parse("").is_err());
    }
}
