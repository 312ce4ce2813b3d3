//! Core value types for the tessera runtime bridge: native handles, trackable
//! identifiers, poses, and a generation-checked arena.

/// Generation-checked slot arena for session-scoped native resources.
pub mod arena;
/// Typed feature keys for the availability gate.
pub mod feature;
/// Opaque native handle newtypes (instance, session, space).
pub mod handle;
/// Identifier types for trackers and trackables.
pub mod ids;
/// Poses, tracking confidence and native location flags.
pub mod pose;

pub use arena::{Arena, ResourceId};
pub use feature::FeatureKind;
pub use handle::{InstanceHandle, SessionHandle, SpaceHandle};
pub use ids::{ListenerToken, TrackableId, TrackerId};
pub use pose::{Location, LocationFlags, Pose, TrackingState};
