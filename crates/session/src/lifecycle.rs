//! Session lifecycle state machine.
//!
//! # Purpose
//!
//! Turn host-delivered [`SessionEvent`]s into handle registry publications,
//! and fan the consequences out to session-scoped resource owners.
//!
//! # States
//!
//! `Unknown → Idle → Ready → Synchronized → Visible → Focused → Stopping →
//! LossPending → Exiting`. Instance creation/destruction and space changes are
//! orthogonal events. The machine never polls; it only reacts.
//!
//! # Invariants
//!
//! * Entering `LossPending` decouples every resource owned by that session
//!   synchronously, through [`SessionListener::on_session_lost`]. Decoupling a
//!   session twice is a no-op.
//! * Render-thread-owned teardown (swapchains) is never run inline; listeners
//!   hand it to the [`TeardownScheduler`] and the render thread runs it via
//!   [`SessionLifecycle::run_deferred_teardown`].
//! * Destroying the session or the instance resets the registry to sentinels
//!   and clears the gate cache.
//! * Every change of state or handles, the reference space included,
//!   invalidates the gate cache.
//! * A session created after the previous one was destroyed is a new
//!   incarnation, even when the runtime reuses the handle value. Listeners
//!   hear about it through [`SessionListener::on_session_created`] and the
//!   next loss decouples it again.
//!
//! # Concurrency
//!
//! Events may arrive on any thread. Event application is serialized by an
//! internal lock; registry reads stay lock-free. Listeners are called outside
//! the listener-list lock but inside the event lock, so they must not deliver
//! events re-entrantly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tessera_primitives::{InstanceHandle, ListenerToken, SessionHandle, SpaceHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{FeatureGate, HandleRegistry, HandleSnapshot, Listeners, SessionState};

/// Lifecycle event delivered by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
	InstanceCreated(InstanceHandle),
	InstanceDestroyed,
	SessionCreated { session: SessionHandle, space: SpaceHandle },
	SessionStateChanged { old: SessionState, new: SessionState },
	SpaceChanged(SpaceHandle),
	SessionDestroyed,
}

/// Why an event did not change anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	/// The event carried a null handle.
	NullHandle,
	/// Session events arrived before an instance exists.
	NoInstance,
	/// The event needs a session and there is none.
	NoSession,
	/// A different session is still alive.
	SessionExists(SessionHandle),
	/// The reported state equals the current state.
	Unchanged,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// The registry now holds this snapshot.
	Applied(HandleSnapshot),
	/// Nothing changed.
	Ignored(IgnoreReason),
}

impl Transition {
	/// Returns true for [`Transition::Applied`].
	pub fn is_applied(&self) -> bool {
		matches!(self, Self::Applied(_))
	}
}

/// Deferred teardown work queued for the render thread.
struct Deferred {
	session: SessionHandle,
	label: &'static str,
	task: Box<dyn FnOnce() + Send>,
}

/// Queues teardown work that must run on the render thread.
#[derive(Clone)]
pub struct TeardownScheduler {
	tx: mpsc::UnboundedSender<Deferred>,
}

impl std::fmt::Debug for TeardownScheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TeardownScheduler").finish_non_exhaustive()
	}
}

impl TeardownScheduler {
	/// Schedules `task` for the next [`SessionLifecycle::run_deferred_teardown`].
	pub fn schedule(&self, session: SessionHandle, label: &'static str, task: impl FnOnce() + Send + 'static) {
		let deferred = Deferred {
			session,
			label,
			task: Box::new(task),
		};
		if self.tx.send(deferred).is_err() {
			warn!(%session, label, "teardown.schedule_dropped");
		}
	}
}

/// Observer of session lifecycle consequences.
///
/// Resource owners implement this to decouple and tear down resources scoped
/// to a session.
pub trait SessionListener: Send + Sync {
	/// A session was created. The runtime may hand out a handle it used
	/// before; owners should treat this as a fresh incarnation of `session`.
	fn on_session_created(&self, _session: SessionHandle) {}

	/// The session state changed.
	fn on_state_changed(&self, _old: SessionState, _new: SessionState) {}

	/// The session entered `LossPending`. Mark owned resources stale and
	/// schedule render-thread teardown; do not block.
	fn on_session_lost(&self, _session: SessionHandle, _teardown: &TeardownScheduler) {}

	/// The session was destroyed; its handles are invalid.
	fn on_session_destroyed(&self, _session: SessionHandle) {}

	/// The reference space was replaced.
	fn on_space_changed(&self, _space: SpaceHandle) {}
}

/// Session lifecycle state machine driving the handle registry.
pub struct SessionLifecycle {
	registry: Arc<HandleRegistry>,
	gate: Arc<FeatureGate>,
	listeners: Listeners<dyn SessionListener>,
	last_lost: AtomicU64,
	events: Mutex<()>,
	teardown: TeardownScheduler,
	deferred: Mutex<mpsc::UnboundedReceiver<Deferred>>,
}

impl std::fmt::Debug for SessionLifecycle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionLifecycle")
			.field("snapshot", &*self.registry.snapshot())
			.field("listeners", &self.listeners)
			.finish_non_exhaustive()
	}
}

impl SessionLifecycle {
	/// Creates a state machine over `registry`, invalidating `gate` on change.
	pub fn new(registry: Arc<HandleRegistry>, gate: Arc<FeatureGate>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			registry,
			gate,
			listeners: Listeners::new(),
			last_lost: AtomicU64::new(0),
			events: Mutex::new(()),
			teardown: TeardownScheduler { tx },
			deferred: Mutex::new(rx),
		}
	}

	/// Shared handle registry.
	pub fn registry(&self) -> &Arc<HandleRegistry> {
		&self.registry
	}

	/// Shared feature gate.
	pub fn gate(&self) -> &Arc<FeatureGate> {
		&self.gate
	}

	/// Current state.
	pub fn state(&self) -> SessionState {
		self.registry.state()
	}

	/// Adds or replaces the listener keyed by `token`.
	pub fn subscribe(&self, token: ListenerToken, listener: Arc<dyn SessionListener>) -> bool {
		self.listeners.subscribe(token, listener)
	}

	/// Removes the listener keyed by `token`.
	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		self.listeners.unsubscribe(token)
	}

	/// Applies one host event.
	pub fn handle(&self, event: SessionEvent) -> Transition {
		let _serial = self.events.lock();
		debug!(?event, "session.event");
		match event {
			SessionEvent::InstanceCreated(instance) => self.instance_created(instance),
			SessionEvent::InstanceDestroyed => self.instance_destroyed(),
			SessionEvent::SessionCreated { session, space } => self.session_created(session, space),
			SessionEvent::SessionStateChanged { old, new } => self.state_changed(old, new),
			SessionEvent::SpaceChanged(space) => self.space_changed(space),
			SessionEvent::SessionDestroyed => self.session_destroyed(),
		}
	}

	/// Decouples every resource owned by `session`.
	///
	/// Runs on entry to `LossPending`; may also be called by delayed teardown
	/// paths. Returns false when `session` was already decoupled.
	pub fn decouple_session(&self, session: SessionHandle) -> bool {
		if session.is_null() || self.last_lost.swap(session.raw(), Ordering::AcqRel) == session.raw() {
			return false;
		}
		info!(%session, "session.decouple");
		self.listeners.for_each(|l| l.on_session_lost(session, &self.teardown));
		true
	}

	/// Runs every queued render-thread teardown task. Returns how many ran.
	pub fn run_deferred_teardown(&self) -> usize {
		let mut rx = self.deferred.lock();
		let mut ran = 0;
		while let Ok(deferred) = rx.try_recv() {
			debug!(session = %deferred.session, label = deferred.label, "teardown.run");
			(deferred.task)();
			ran += 1;
		}
		ran
	}

	/// Scheduler for render-thread teardown outside of loss handling.
	pub fn teardown_scheduler(&self) -> TeardownScheduler {
		self.teardown.clone()
	}

	fn instance_created(&self, instance: InstanceHandle) -> Transition {
		if instance.is_null() {
			return Transition::Ignored(IgnoreReason::NullHandle);
		}
		let snap = self.registry.update(|cur| HandleSnapshot { instance, ..*cur });
		self.gate.invalidate();
		info!(%instance, "session.instance_created");
		Transition::Applied(snap)
	}

	fn instance_destroyed(&self) -> Transition {
		let cur = self.registry.snapshot();
		if cur.instance.is_null() {
			return Transition::Ignored(IgnoreReason::NoInstance);
		}
		if !cur.session.is_null() {
			warn!(session = %cur.session, "session.instance_destroyed_with_live_session");
			self.decouple_session(cur.session);
			self.listeners.for_each(|l| l.on_session_destroyed(cur.session));
		}
		let snap = self.registry.reset_all();
		self.gate.invalidate();
		info!(instance = %cur.instance, "session.instance_destroyed");
		Transition::Applied(snap)
	}

	fn session_created(&self, session: SessionHandle, space: SpaceHandle) -> Transition {
		if session.is_null() {
			return Transition::Ignored(IgnoreReason::NullHandle);
		}
		let cur = self.registry.snapshot();
		if cur.instance.is_null() {
			warn!(%session, "session.created_without_instance");
			return Transition::Ignored(IgnoreReason::NoInstance);
		}
		if !cur.session.is_null() && cur.session != session {
			warn!(live = %cur.session, %session, "session.created_while_live");
			return Transition::Ignored(IgnoreReason::SessionExists(cur.session));
		}
		if cur.session.is_null() {
			// A reused handle must be decoupled again on its next loss.
			let _ = self.last_lost.compare_exchange(session.raw(), 0, Ordering::AcqRel, Ordering::Acquire);
			self.listeners.for_each(|l| l.on_session_created(session));
		}
		let snap = self.registry.update(|cur| HandleSnapshot {
			instance: cur.instance,
			session,
			space,
			state: SessionState::Unknown,
			epoch: cur.epoch,
		});
		self.gate.invalidate();
		info!(%session, %space, "session.created");
		Transition::Applied(snap)
	}

	fn state_changed(&self, old: SessionState, new: SessionState) -> Transition {
		let cur = self.registry.snapshot();
		if cur.session.is_null() {
			warn!(?old, ?new, "session.state_without_session");
			return Transition::Ignored(IgnoreReason::NoSession);
		}
		if cur.state == new {
			return Transition::Ignored(IgnoreReason::Unchanged);
		}
		if cur.state != old {
			// The runtime is authoritative; apply and note the gap.
			warn!(expected = ?old, actual = ?cur.state, ?new, "session.state_out_of_order");
		}

		let snap = self.registry.update(|c| HandleSnapshot { state: new, ..*c });
		self.gate.invalidate();
		info!(session = %cur.session, from = ?cur.state, to = ?new, "session.state");
		self.listeners.for_each(|l| l.on_state_changed(cur.state, new));

		if new == SessionState::LossPending {
			self.decouple_session(cur.session);
		}
		Transition::Applied(snap)
	}

	fn space_changed(&self, space: SpaceHandle) -> Transition {
		let cur = self.registry.snapshot();
		if cur.session.is_null() {
			return Transition::Ignored(IgnoreReason::NoSession);
		}
		let snap = self.registry.update(|c| HandleSnapshot { space, ..*c });
		self.gate.invalidate();
		debug!(%space, "session.space_changed");
		self.listeners.for_each(|l| l.on_space_changed(space));
		Transition::Applied(snap)
	}

	fn session_destroyed(&self) -> Transition {
		let cur = self.registry.snapshot();
		if cur.session.is_null() {
			return Transition::Ignored(IgnoreReason::NoSession);
		}
		if cur.state != SessionState::LossPending && cur.state != SessionState::Exiting {
			debug!(session = %cur.session, state = ?cur.state, "session.destroyed_early");
		}
		self.decouple_session(cur.session);
		self.listeners.for_each(|l| l.on_session_destroyed(cur.session));
		let snap = self.registry.reset_session();
		self.gate.invalidate();
		info!(session = %cur.session, "session.destroyed");
		Transition::Applied(snap)
	}
}
