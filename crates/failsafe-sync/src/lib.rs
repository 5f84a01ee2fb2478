//! failsafe-sync — pushes mutable application state to durable storage
//! so a standby can resume with near-current data.
//!
//! A sync is a [`SyncJob`]: every attempt copies all configured paths,
//! skipping locks, pids, sockets, temp files and logs. Attempts are
//! bounded by a wall-clock timeout and retried with a fixed delay. A
//! failed sync is reported, never raised: failover proceeds with
//! whatever state already exists remotely.

pub mod error;
pub mod exclude;
pub mod storage;
pub mod synchronizer;
pub mod transport;

pub use error::SyncError;
pub use exclude::ExcludeRules;
pub use storage::StorageUri;
pub use synchronizer::{StateSynchronizer, SyncJob, SyncReport, SyncStatus};
pub use transport::{CommandTransport, DirectoryTransport, SyncStats, SyncTransport};
