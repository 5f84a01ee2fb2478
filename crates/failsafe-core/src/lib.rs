//! failsafe-core — shared building blocks for the failover orchestrator.
//!
//! Holds the TOML configuration model, the domain types shared between
//! crates (probe results, persisted records, activation requests), the
//! injectable [`Clock`] and the bounded retry helper every network call
//! goes through.

pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FailsafeConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use retry::{retry_with_timeout, AttemptFailure, RetryError, RetryOutcome, RetryPolicy};
pub use types::*;
