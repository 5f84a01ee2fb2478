//! failsafe-alert — outbound notification of state transitions.
//!
//! Each channel sends at most one message per throttle window, and a
//! message gets exactly one delivery attempt. Delivery failures are
//! logged and dropped: alerting never fails the orchestrator.

pub mod error;
pub mod notifier;
pub mod sink;

pub use error::AlertError;
pub use notifier::{AlertNotifier, NotifyReport};
pub use sink::{Alert, AlertLevel, AlertSink, TelegramSink, WebhookSink};
