//! failsafe-provider — one adapter per execution environment.
//!
//! Every environment the orchestrator can hand responsibility to sits
//! behind [`ProviderAdapter`]:
//!
//! ```text
//!                      ProviderAdapter
//!        ┌──────────────────┼───────────────────┐
//!   LocalProvider      HttpStandby        CompositeStandby
//!   (primary, no-op)   /activate          N × StandbyEndpoint
//!                      /deactivate        "K of N activated"
//!                      /health
//!                          │
//!                     ControlPlane (optional)
//!                     RenderControl | FlyControl
//! ```
//!
//! Activation and deactivation are idempotent. Every request carries a
//! timeout, and standby health polling is bounded by attempts.

pub mod adapter;
pub mod build;
pub mod composite;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod local;

pub use adapter::{Activation, AppOutcome, AppResult, ProviderAdapter, ProviderStatus};
pub use build::build_adapter;
pub use composite::CompositeStandby;
pub use control::{ControlPlane, FlyControl, RenderControl};
pub use endpoint::{StandbyEndpoint, StandbyHealth};
pub use error::{ActivationError, ControlError};
pub use http::HttpStandby;
pub use local::LocalProvider;
