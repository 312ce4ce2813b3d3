//! Generic per-frame trackable subsystem.
//!
//! # Frame sequence
//!
//! [`TrackableSubsystem::update`] runs once per frame on the frame thread:
//!
//! 1. Tear down the native tracker if its session went stale, the caller
//!    stopped the subsystem, or the configuration changed. Every live
//!    trackable of the old tracker is reported removed.
//! 2. Ask the [`FeatureGate`] whether the feature may do work.
//! 3. Ensure a tracker exists for the current session. A new tracker gets a
//!    fresh [`TrackerId`], so no trackable id survives a session change.
//! 4. Poll, filter through the configuration and reduce against the live set.
//! 5. Discard the poll when the session was lost while it ran.
//!
//! Removals produced in step 1 are never dropped: when a later step fails they
//! are returned in place of the error, and the error surfaces next frame.
//!
//! # Creation failures
//!
//! A rejected tracker creation stops the subsystem and is kept in
//! [`TrackableSubsystem::last_error`]. It is not retried until the caller
//! calls [`TrackableSubsystem::start`] or [`TrackableSubsystem::set_config`].

use std::sync::Arc;

use tessera_primitives::{ListenerToken, ResourceId, SessionHandle, TrackableId, TrackerId};
use tessera_session::{FeatureGate, HandleRegistry, HandleSnapshot, SessionError, SessionLifecycle};
use tracing::{debug, info, warn};

use crate::binding::{TrackablePayload, TrackerBinding, TrackerConfig};
use crate::error::{ResourceError, Result, TrackingError};
use crate::reducer::{ChangeSet, RawTrackable, Trackable, TrackableSet, reduce};
use crate::resource::{LossMarks, ResourceManager};

/// Per-frame inputs shared by every subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
	/// Registry snapshot taken at frame start.
	pub snapshot: HandleSnapshot,
	/// Predicted display time in nanoseconds.
	pub time: i64,
}

impl FrameContext {
	/// Captures the registry for a frame displayed at `time`.
	pub fn capture(registry: &HandleRegistry, time: i64) -> Self {
		Self {
			snapshot: *registry.snapshot(),
			time,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveTracker {
	resource: ResourceId,
	id: TrackerId,
}

/// Drives one native tracker and its live trackable set.
pub struct TrackableSubsystem<B: TrackerBinding> {
	binding: Arc<B>,
	lifecycle: Arc<SessionLifecycle>,
	resources: ResourceManager<B>,
	config: B::Config,
	tracker: Option<ActiveTracker>,
	live: TrackableSet<B::Payload>,
	pending: ChangeSet<B::Payload>,
	requested: bool,
	config_dirty: bool,
	last_error: Option<ResourceError>,
	token: ListenerToken,
}

impl<B: TrackerBinding> std::fmt::Debug for TrackableSubsystem<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TrackableSubsystem")
			.field("feature", &B::Payload::FEATURE)
			.field("tracker", &self.tracker)
			.field("live", &self.live.len())
			.field("requested", &self.requested)
			.finish_non_exhaustive()
	}
}

impl<B> TrackableSubsystem<B>
where
	B: TrackerBinding,
	B::Config: TrackerConfig<B::Payload>,
{
	/// Creates a started subsystem. The tracker is created on the first
	/// usable frame.
	pub fn new(binding: Arc<B>, lifecycle: Arc<SessionLifecycle>, config: B::Config) -> Self {
		let marks = Arc::new(LossMarks::new());
		let token = ListenerToken::unique();
		lifecycle.subscribe(token, Arc::clone(&marks) as _);
		Self {
			resources: ResourceManager::new(B::Payload::FEATURE.as_str(), Arc::clone(&binding), marks),
			binding,
			lifecycle,
			config,
			tracker: None,
			live: TrackableSet::new(),
			pending: ChangeSet::default(),
			requested: true,
			config_dirty: false,
			last_error: None,
			token,
		}
	}

	pub fn binding(&self) -> &Arc<B> {
		&self.binding
	}

	pub fn gate(&self) -> &Arc<FeatureGate> {
		self.lifecycle.gate()
	}

	pub fn registry(&self) -> &Arc<HandleRegistry> {
		self.lifecycle.registry()
	}

	/// Per-incarnation loss marks this subsystem's resources are judged by.
	pub fn loss_marks(&self) -> &Arc<LossMarks> {
		self.resources.marks()
	}

	pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
		&self.lifecycle
	}

	pub fn config(&self) -> &B::Config {
		&self.config
	}

	/// Live trackables as of the last update.
	pub fn trackables(&self) -> &TrackableSet<B::Payload> {
		&self.live
	}

	pub fn get(&self, id: TrackableId) -> Option<&Trackable<B::Payload>> {
		self.live.get(id)
	}

	/// Id of the current native tracker.
	pub fn tracker_id(&self) -> Option<TrackerId> {
		self.tracker.map(|t| t.id)
	}

	/// Native handle of the current tracker.
	pub fn native(&self) -> Option<&B::Native> {
		self.tracker.and_then(|t| self.resources.native(t.resource))
	}

	/// Returns true while a native tracker exists.
	pub fn is_running(&self) -> bool {
		self.tracker.is_some()
	}

	/// Last tracker creation failure, cleared by [`Self::start`].
	pub fn last_error(&self) -> Option<&ResourceError> {
		self.last_error.as_ref()
	}

	/// Requests a tracker from the next usable frame on.
	pub fn start(&mut self) {
		self.requested = true;
		self.last_error = None;
	}

	/// Destroys the tracker on the next update, reporting its trackables
	/// removed.
	pub fn stop(&mut self) {
		self.requested = false;
	}

	/// Replaces the configuration. A running tracker is recreated with it on
	/// the next update.
	pub fn set_config(&mut self, config: B::Config) -> std::result::Result<(), ResourceError> {
		config.validate()?;
		self.config = config;
		self.config_dirty = self.tracker.is_some();
		self.start();
		Ok(())
	}

	/// Advances one frame and returns what changed.
	pub fn update(&mut self, frame: &FrameContext) -> Result<ChangeSet<B::Payload>> {
		let feature = B::Payload::FEATURE;
		self.retire_tracker(frame);

		if !self.requested {
			return Ok(std::mem::take(&mut self.pending));
		}
		let gate = self.lifecycle.gate();
		if !gate.is_usable(feature) {
			let reason = gate.diagnostic(feature);
			return self.fail(TrackingError::Unavailable { feature, reason });
		}
		let session = match frame.snapshot.require_running() {
			Ok(session) => session,
			Err(e) => return self.fail(e.into()),
		};

		let active = match self.ensure_tracker(session) {
			Ok(active) => active,
			Err(e) => return self.fail(e),
		};
		let Some(native) = self.resources.native(active.resource) else {
			return self.fail(ResourceError::Stale(active.resource).into());
		};

		let polled = self.binding.poll(native, frame).map(|entities| {
			entities
				.into_iter()
				.filter(|e| self.config.accepts(&e.payload))
				.map(|e| RawTrackable {
					id: TrackableId::new(active.id, e.instance),
					location: e.location,
					payload: e.payload,
				})
				.collect::<Vec<_>>()
		});
		if let Err(error) = &polled {
			debug!(%feature, %error, "tracking.poll_failed");
		}

		if !self.lifecycle.registry().is_current(session) || !self.resources.is_live(active.resource, session) {
			debug!(%feature, %session, "tracking.poll_discarded");
			return self.fail(SessionError::SessionLost.into());
		}

		let changes = reduce(&mut self.live, polled);
		let mut out = std::mem::take(&mut self.pending);
		out.merge(changes);
		Ok(out)
	}

	/// Removes the tracker if it can no longer be used.
	fn retire_tracker(&mut self, frame: &FrameContext) {
		let Some(active) = self.tracker else { return };
		let stale = !self.resources.is_live(active.resource, frame.snapshot.session);
		if !stale && self.requested && !self.config_dirty {
			return;
		}
		self.resources.destroy(active.resource);
		self.tracker = None;
		self.config_dirty = false;
		let removed = self.live.clear();
		info!(
			feature = %B::Payload::FEATURE,
			tracker = %active.id,
			stale,
			removed = removed.len(),
			"tracking.tracker_retired"
		);
		self.pending.removed.extend(removed);
	}

	fn ensure_tracker(&mut self, session: SessionHandle) -> Result<ActiveTracker> {
		if let Some(active) = self.tracker {
			return Ok(active);
		}
		let created = self
			.config
			.validate()
			.and_then(|()| self.resources.ensure(None, session, &self.config));
		match created {
			Ok(resource) => {
				let active = ActiveTracker {
					resource,
					id: TrackerId::next(),
				};
				info!(feature = %B::Payload::FEATURE, tracker = %active.id, %session, "tracking.tracker_created");
				self.tracker = Some(active);
				Ok(active)
			}
			Err(ResourceError::Session(e)) => Err(e.into()),
			Err(e) => {
				warn!(feature = %B::Payload::FEATURE, error = %e, "tracking.tracker_rejected");
				self.requested = false;
				self.last_error = Some(e.clone());
				Err(e.into())
			}
		}
	}

	/// Returns buffered removals in preference to `error`.
	fn fail(&mut self, error: TrackingError) -> Result<ChangeSet<B::Payload>> {
		if self.pending.is_empty() {
			Err(error)
		} else {
			Ok(std::mem::take(&mut self.pending))
		}
	}
}

impl<B: TrackerBinding> Drop for TrackableSubsystem<B> {
	fn drop(&mut self) {
		self.lifecycle.unsubscribe(self.token);
	}
}
