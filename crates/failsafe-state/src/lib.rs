//! failsafe-state — the only state shared across orchestrator restarts.
//!
//! Two JSON files live under the state directory:
//!
//! ```text
//! <state_dir>/
//!   failover_record.json   FailoverRecord: authoritative provider
//!   usage_status.json      UsageStatus: free-tier hours this month
//!   failsafed.lock         SingleInstanceGuard (flock + pid)
//! ```
//!
//! Writes go to a temp file in the same directory and are renamed over
//! the target, so a process killed mid-write leaves the previous version
//! intact. Reads default missing files and missing fields instead of
//! failing.

pub mod error;
pub mod lock;
pub mod store;

pub use error::{LockError, StateError, StateResult};
pub use lock::InstanceGuard;
pub use store::StatusStore;
