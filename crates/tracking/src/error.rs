//! Error types for trackers, resources and native calls.

use tessera_primitives::{FeatureKind, ResourceId};
use tessera_session::{SessionError, Unavailable};
use thiserror::Error;

/// Failure reported by a native runtime call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
	/// The runtime returned an error code.
	#[error("runtime error code {0}")]
	Code(i32),
	/// The handle passed to the runtime is no longer valid.
	#[error("invalid native handle")]
	InvalidHandle,
	/// The runtime reported that the session is lost.
	#[error("session lost in native call")]
	SessionLost,
	/// The runtime does not support the request.
	#[error("unsupported: {0}")]
	Unsupported(String),
}

/// Errors creating, reconfiguring or destroying a session-scoped resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
	/// A requested parameter exceeds what the runtime supports.
	#[error("{what} {requested} exceeds runtime maximum {max}")]
	CapabilityExceeded {
		/// Parameter name.
		what: &'static str,
		/// Requested value.
		requested: u32,
		/// Runtime limit.
		max: u32,
	},
	/// The configuration is invalid before it reaches the runtime.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
	/// The runtime rejected the creation call.
	#[error("runtime rejected resource: {0}")]
	Rejected(#[from] NativeError),
	/// No live session to own the resource.
	#[error(transparent)]
	Session(#[from] SessionError),
	/// The resource id no longer names a live record.
	#[error("resource {0} is gone")]
	Stale(ResourceId),
}

/// Errors surfaced by a trackable subsystem update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
	/// The availability gate refused the feature this frame.
	#[error("{feature} unavailable: {}", reason.as_ref().map_or_else(|| "unknown".to_string(), ToString::to_string))]
	Unavailable {
		/// Refused feature.
		feature: FeatureKind,
		/// Gate diagnostic, when one was recorded.
		reason: Option<Unavailable>,
	},
	/// The subsystem has no native tracker yet.
	#[error("{0} is not running")]
	NotRunning(FeatureKind),
	/// An entity id does not belong to this subsystem.
	#[error("unknown trackable {0}")]
	UnknownTrackable(tessera_primitives::TrackableId),
	#[error(transparent)]
	Resource(#[from] ResourceError),
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error(transparent)]
	Native(#[from] NativeError),
}

/// Result type for subsystem operations.
pub type Result<T> = std::result::Result<T, TrackingError>;
