//! Trackable subsystems for the tessera runtime bridge.
//!
//! - [`reducer`]: folds each frame's observations into added, updated and
//!   removed lists.
//! - [`resource`]: owns session-scoped native handles and reaps them when
//!   their session goes away.
//! - [`subsystem`]: the per-frame pipeline every trackable kind shares (gate,
//!   ensure tracker, poll, reduce).
//! - [`features`]: planes, images, markers, raycasts, anchors with background
//!   persistence, and composition layers.
//! - `sim` (feature `sim`, always on in unit tests): a scripted runtime
//!   implementing every binding.

pub mod binding;
pub mod error;
pub mod features;
pub mod reducer;
pub mod resource;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod subsystem;

pub use binding::{RawEntity, ResourceBinding, SpaceLocator, TrackablePayload, TrackerBinding, TrackerConfig};
pub use error::{NativeError, ResourceError, Result, TrackingError};
pub use reducer::{ChangeSet, PollOutcome, RawTrackable, Trackable, TrackableSet, reduce};
pub use resource::{ActiveResource, LossMarks, ResourceManager};
pub use subsystem::{FrameContext, TrackableSubsystem};
