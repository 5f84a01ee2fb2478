//! failsafe-health — deciding when the primary is down.
//!
//! # Architecture
//!
//! ```text
//! HealthProbe::probe()           one HealthStatus per cycle
//!   ├── primary URL      ─┐
//!   ├── secondary URL     ├─ first success wins
//!   ├── process check    ─┘
//!   └── internet check   (optional, required on top)
//!
//! CircuitBreaker::observe(status)
//!   ├── FailureWindow    consecutive failures / successes
//!   └── Closed → Open → CoolingDown → Closed
//!                  └──→ Blocked (after repeated activation failures)
//! ```
//!
//! The breaker is pure: it never performs I/O, it only tells the caller
//! whether to activate the standby, deactivate it, or hold.

pub mod breaker;
pub mod checker;
pub mod error;
pub mod window;

pub use breaker::{BreakerConfig, BreakerDecision, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use checker::{HealthProbe, Probe, ProbeTarget};
pub use error::ProbeError;
pub use window::FailureWindow;
