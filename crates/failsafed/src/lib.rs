//! failsafed — keeps a locally hosted service reachable by failing over
//! to a cloud standby while the local machine is down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Orchestrator ───────────────────────────┐
//! │                                                                     │
//! │  MonthlyResetHandler ──► ProviderSwitch::switch_to (forced)         │
//! │                                                                     │
//! │  HealthProbe ──► UsageTracker ──► CircuitBreaker                    │
//! │                                     │                               │
//! │                        Activate ────┤──── Deactivate                │
//! │                           │                   │                     │
//! │            ProviderSwitch::failover   ProviderSwitch::failback      │
//! │            (StateSynchronizer, adapters, StatusStore)               │
//! │                                                                     │
//! │  AlertNotifier: one throttled message per transition                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The binary wraps this in `start` / `stop` / `status` subcommands and
//! holds the single-instance lock for the life of the loop.

pub mod error;
pub mod monthly;
pub mod orchestrator;
pub mod switch;
pub mod usage;

pub use error::DaemonError;
pub use monthly::{MonthlyResetHandler, ResetAction};
pub use orchestrator::{CycleReport, Orchestrator};
pub use switch::{ProviderSwitch, SwitchError, SwitchOutcome, SyncOutcome};
pub use usage::{UsageAction, UsageTracker};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,failsafed=debug,failsafe=debug";

/// Config path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/failsafe/failsafe.toml";
