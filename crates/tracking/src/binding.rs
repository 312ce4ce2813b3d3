//! Seams between the tracking core and a native runtime.
//!
//! A runtime backend implements these traits; the core owns every decision
//! about when to call them. All methods take `&self` so one backend can be
//! shared between the frame thread, worker threads and teardown tasks.

use std::fmt::Debug;

use tessera_primitives::{FeatureKind, Location, LocationFlags, Pose, SessionHandle, SpaceHandle};

use crate::error::{NativeError, ResourceError};
use crate::subsystem::FrameContext;

/// Creates and destroys one kind of session-scoped native resource.
pub trait ResourceBinding: Send + Sync + 'static {
	/// Native handle of a created resource.
	type Native: Clone + Debug + PartialEq + Send;
	/// Creation parameters, snapshotted into the resource record.
	type Config: Clone + Debug + Send;

	/// Creates the native resource for `session`.
	fn create(&self, session: SessionHandle, config: &Self::Config) -> Result<Self::Native, NativeError>;

	/// Destroys a native resource. Must tolerate handles whose session is gone.
	fn destroy(&self, native: &Self::Native);
}

/// Payload carried by one kind of trackable.
pub trait TrackablePayload: Clone + Debug + PartialEq + Send + 'static {
	/// Feature whose gate guards trackables of this kind.
	const FEATURE: FeatureKind;
}

/// Validation and filtering owned by the core rather than the runtime.
pub trait TrackerConfig<P>: Clone + Debug + Send {
	/// Rejects configurations that must never reach the runtime.
	fn validate(&self) -> Result<(), ResourceError> {
		Ok(())
	}

	/// Returns false for observations the caller did not ask for.
	fn accepts(&self, _payload: &P) -> bool {
		true
	}
}

/// One entity reported by a native poll, before identity is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity<P> {
	/// Runtime-assigned id, unique within the tracker's lifetime.
	pub instance: u64,
	pub location: Location,
	pub payload: P,
}

/// Native tracker that reports entities once per frame.
///
/// The tracker's [`ResourceBinding::Config`] is expected to implement
/// [`TrackerConfig`] for [`Self::Payload`]; subsystems require it.
pub trait TrackerBinding: ResourceBinding {
	type Payload: TrackablePayload;

	/// Polls the full set of entities the tracker currently sees.
	///
	/// `Err` means the poll failed and says nothing about which entities
	/// exist; callers keep their previous view.
	fn poll(&self, tracker: &Self::Native, frame: &FrameContext) -> Result<Vec<RawEntity<Self::Payload>>, NativeError>;
}

/// Locates a native space relative to the session's reference space.
pub trait SpaceLocator: Send + Sync + 'static {
	/// Native space being located.
	type Space: Copy + Debug + Send;

	/// Returns the pose of `space` in `base` at `time` with validity flags.
	fn locate(&self, space: Self::Space, base: SpaceHandle, time: i64) -> Result<(Pose, LocationFlags), NativeError>;
}
