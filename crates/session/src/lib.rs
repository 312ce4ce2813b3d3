//! Session-synchronized state for the tessera runtime bridge.
//!
//! - [`HandleRegistry`]: lock-free snapshot of the instance, session and space
//!   handles plus the session state. The single source of truth every feature
//!   reads.
//! - [`SessionLifecycle`]: applies host-delivered [`SessionEvent`]s to the
//!   registry, decouples session-owned resources on loss, and invalidates the
//!   gate.
//! - [`FeatureGate`]: cached per-feature usability verdicts with rate-limited
//!   diagnostics.

pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod listeners;
pub mod registry;
mod state;

pub use error::{Result, SessionError};
pub use gate::{FeatureGate, InitStatus, Unavailable};
pub use lifecycle::{IgnoreReason, SessionEvent, SessionLifecycle, SessionListener, TeardownScheduler, Transition};
pub use listeners::Listeners;
pub use registry::{HandleRegistry, HandleSnapshot};
pub use state::SessionState;
