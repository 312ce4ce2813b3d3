//! Spatial anchors with background persistence.
//!
//! # Mental model
//!
//! * [`Anchors::add`] registers a pending anchor; the native anchor is created
//!   on the next update, on the frame thread.
//! * Every update locates each created anchor and reduces the result like any
//!   other trackable kind.
//! * Save runs on the save worker; load, erase, clear and list run on the load
//!   worker. Both block on the native store and post results that
//!   [`Anchors::update`] drains and hands to the caller's callbacks, on the
//!   frame thread.
//! * The store connection is the session-scoped resource. When the session
//!   changes, including a new session reusing the old handle, anchors of the
//!   old session are forgotten and any store result issued for it is
//!   reported as [`PersistFailure::SessionLost`].

mod persistence;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_primitives::{FeatureKind, Location, Pose, SessionHandle, TrackableId, TrackerId};
use tessera_session::SessionLifecycle;
use tessera_worker::{RetryPolicy, TaskClass, Worker, WorkerRegistry, WorkerSpec};
use tracing::{debug, info, warn};

pub use self::persistence::{PersistFailure, PersistentStore};
use self::persistence::{StoreHandler, StoreJob, StoreOp, StoreReply, StoreResult};
use crate::binding::{RawEntity, ResourceBinding, SpaceLocator, TrackablePayload, TrackerBinding, TrackerConfig};
use crate::error::{NativeError, Result, TrackingError};
use crate::reducer::{ChangeSet, Trackable};
use crate::subsystem::{FrameContext, TrackableSubsystem};

/// Native anchor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorNative(pub u64);

/// Native anchor store connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreConnection(pub u64);

/// Native anchor support.
pub trait AnchorRuntime: SpaceLocator<Space = AnchorNative> {
	fn connect(&self, session: SessionHandle) -> std::result::Result<StoreConnection, NativeError>;

	fn disconnect(&self, conn: StoreConnection);

	/// Creates an anchor at `pose` in the reference space `frame` names.
	fn create_anchor(&self, frame: &FrameContext, pose: Pose) -> std::result::Result<AnchorNative, NativeError>;

	fn destroy_anchor(&self, anchor: AnchorNative);
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnchorPayload {
	/// Name the anchor is persisted under, if any.
	pub name: Option<String>,
	pub persisted: bool,
}

impl TrackablePayload for AnchorPayload {
	const FEATURE: FeatureKind = FeatureKind::SpatialAnchor;
}

/// Anchor tracker parameters. Anchors need none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnchorConfig;

impl TrackerConfig<AnchorPayload> for AnchorConfig {}

#[derive(Debug, Clone)]
struct AnchorEntry {
	session: SessionHandle,
	incarnation: u64,
	native: Option<AnchorNative>,
	requested: Pose,
	name: Option<String>,
	persisted: bool,
}

pub(crate) enum DirectoryLookup {
	Missing,
	Pending,
	Ready(AnchorNative),
}

/// Anchors known to this process, shared with the persistence workers.
#[derive(Debug, Default)]
pub(crate) struct AnchorDirectory {
	entries: Mutex<BTreeMap<u64, AnchorEntry>>,
	next: AtomicU64,
}

impl AnchorDirectory {
	fn allocate(&self) -> u64 {
		self.next.fetch_add(1, Ordering::Relaxed) + 1
	}

	pub(crate) fn lookup(&self, instance: u64) -> DirectoryLookup {
		match self.entries.lock().get(&instance) {
			None => DirectoryLookup::Missing,
			Some(AnchorEntry { native: None, .. }) => DirectoryLookup::Pending,
			Some(AnchorEntry { native: Some(n), .. }) => DirectoryLookup::Ready(*n),
		}
	}
}

/// Store connection binding that reports created anchors as trackables.
#[derive(Debug)]
pub struct AnchorTracker<R> {
	runtime: Arc<R>,
	directory: Arc<AnchorDirectory>,
}

impl<R: AnchorRuntime> ResourceBinding for AnchorTracker<R> {
	type Native = StoreConnection;
	type Config = AnchorConfig;

	fn create(&self, session: SessionHandle, _config: &AnchorConfig) -> std::result::Result<StoreConnection, NativeError> {
		self.runtime.connect(session)
	}

	fn destroy(&self, conn: &StoreConnection) {
		self.runtime.disconnect(*conn);
	}
}

impl<R: AnchorRuntime> TrackerBinding for AnchorTracker<R> {
	type Payload = AnchorPayload;

	fn poll(&self, _conn: &StoreConnection, frame: &FrameContext) -> std::result::Result<Vec<RawEntity<AnchorPayload>>, NativeError> {
		let created: Vec<(u64, AnchorNative, AnchorPayload)> = self
			.directory
			.entries
			.lock()
			.iter()
			.filter(|(_, e)| e.session == frame.snapshot.session)
			.filter_map(|(instance, e)| {
				let payload = AnchorPayload {
					name: e.name.clone(),
					persisted: e.persisted,
				};
				e.native.map(|n| (*instance, n, payload))
			})
			.collect();

		Ok(created
			.into_iter()
			.map(|(instance, native, payload)| {
				let location = match self.runtime.locate(native, frame.snapshot.space, frame.time) {
					Ok((pose, flags)) => Location::from_flags(pose, flags),
					Err(_) => Location::Failed,
				};
				RawEntity { instance, location, payload }
			})
			.collect())
	}
}

/// Successful outcome of a persistence request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistSuccess {
	Saved { id: TrackableId, name: String },
	/// The restored anchor; the update delivering this result reports it added.
	Loaded { id: TrackableId, name: String },
	Erased { name: String },
	Cleared,
	Listed(Vec<String>),
}

/// Completion callback, run on the frame thread during [`Anchors::update`].
pub type PersistCallback = Box<dyn FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send>;

/// Worker tuning for anchor persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistenceOptions {
	pub retry: RetryPolicy,
	pub idle_exit: Option<Duration>,
}

/// Spatial anchor subsystem.
pub struct Anchors<R: AnchorRuntime, S: PersistentStore> {
	runtime: Arc<R>,
	directory: Arc<AnchorDirectory>,
	inner: TrackableSubsystem<AnchorTracker<R>>,
	save: Worker<StoreHandler<S>>,
	load: Worker<StoreHandler<S>>,
	callbacks: FxHashMap<u64, PersistCallback>,
	next_ticket: u64,
	names: Vec<String>,
	creation_failures: Vec<(TrackableId, NativeError)>,
}

impl<R: AnchorRuntime, S: PersistentStore> std::fmt::Debug for Anchors<R, S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Anchors")
			.field("inner", &self.inner)
			.field("save", &self.save)
			.field("load", &self.load)
			.field("callbacks", &self.callbacks.len())
			.finish_non_exhaustive()
	}
}

impl<R: AnchorRuntime, S: PersistentStore> Anchors<R, S> {
	/// Creates the subsystem. Worker threads start on first use.
	pub fn new(runtime: Arc<R>, store: Arc<S>, lifecycle: Arc<SessionLifecycle>, workers: WorkerRegistry, options: PersistenceOptions) -> Self {
		let directory = Arc::new(AnchorDirectory::default());
		let registry = Arc::clone(lifecycle.registry());
		let tracker = AnchorTracker {
			runtime: Arc::clone(&runtime),
			directory: Arc::clone(&directory),
		};
		let inner = TrackableSubsystem::new(Arc::new(tracker), lifecycle, AnchorConfig);
		let marks = Arc::clone(inner.loss_marks());
		let handler = || StoreHandler::new(Arc::clone(&store), Arc::clone(&registry), Arc::clone(&marks), Arc::clone(&directory));
		let spec = |name: &str, class: TaskClass| WorkerSpec::new(name, class).retry(options.retry).idle_exit(options.idle_exit);
		let save = Worker::new(spec("anchor-save", TaskClass::PersistSave), handler(), workers.clone());
		let load = Worker::new(spec("anchor-load", TaskClass::PersistLoad), handler(), workers);
		Self {
			inner,
			runtime,
			directory,
			save,
			load,
			callbacks: FxHashMap::default(),
			next_ticket: 0,
			names: Vec::new(),
			creation_failures: Vec::new(),
		}
	}

	pub fn subsystem(&self) -> &TrackableSubsystem<AnchorTracker<R>> {
		&self.inner
	}

	pub fn get(&self, id: TrackableId) -> Option<&Trackable<AnchorPayload>> {
		self.inner.get(id)
	}

	/// Names from the last successful list request.
	pub fn persisted_names(&self) -> &[String] {
		&self.names
	}

	/// Persistence requests whose callback has not run yet.
	pub fn pending_requests(&self) -> usize {
		self.callbacks.len()
	}

	/// Anchors whose native creation failed since the last call.
	pub fn take_creation_failures(&mut self) -> Vec<(TrackableId, NativeError)> {
		std::mem::take(&mut self.creation_failures)
	}

	/// Requests an anchor at `pose`. It is created natively on the next
	/// update and reported added once located.
	pub fn add(&mut self, pose: Pose) -> Result<TrackableId> {
		let (tracker, session, _) = self.live_connection()?;
		let instance = self.directory.allocate();
		self.directory.entries.lock().insert(
			instance,
			AnchorEntry {
				session,
				incarnation: self.inner.loss_marks().incarnation(session),
				native: None,
				requested: pose,
				name: None,
				persisted: false,
			},
		);
		let id = TrackableId::new(tracker, instance);
		debug!(%id, "anchor.requested");
		Ok(id)
	}

	/// Destroys an anchor. It is reported removed on the next update.
	pub fn remove(&mut self, id: TrackableId) -> Result<()> {
		if self.inner.tracker_id() != Some(id.tracker) {
			return Err(TrackingError::UnknownTrackable(id));
		}
		let entry = self.directory.entries.lock().remove(&id.instance).ok_or(TrackingError::UnknownTrackable(id))?;
		if let Some(native) = entry.native {
			self.runtime.destroy_anchor(native);
		}
		debug!(%id, "anchor.removed");
		Ok(())
	}

	/// Persists `id` under `name`. Retried in the background while the anchor
	/// is still being created or the map is not good enough yet.
	pub fn save(&mut self, id: TrackableId, name: impl Into<String>, callback: impl FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send + 'static) -> Result<u64> {
		if self.inner.tracker_id() != Some(id.tracker) || !self.directory.entries.lock().contains_key(&id.instance) {
			return Err(TrackingError::UnknownTrackable(id));
		}
		let op = StoreOp::Save {
			instance: id.instance,
			name: name.into(),
		};
		self.submit(op, Box::new(callback))
	}

	/// Restores the anchor persisted under `name` into the current session.
	pub fn load(&mut self, name: impl Into<String>, callback: impl FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send + 'static) -> Result<u64> {
		self.submit(StoreOp::Load { name: name.into() }, Box::new(callback))
	}

	/// Deletes the persisted entry `name`. Live anchors are kept.
	pub fn erase(&mut self, name: impl Into<String>, callback: impl FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send + 'static) -> Result<u64> {
		self.submit(StoreOp::Erase { name: name.into() }, Box::new(callback))
	}

	/// Deletes every persisted entry.
	pub fn erase_all(&mut self, callback: impl FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send + 'static) -> Result<u64> {
		self.submit(StoreOp::Clear, Box::new(callback))
	}

	/// Refreshes [`Self::persisted_names`].
	pub fn refresh_names(&mut self, callback: impl FnOnce(std::result::Result<PersistSuccess, PersistFailure>) + Send + 'static) -> Result<u64> {
		self.submit(StoreOp::List, Box::new(callback))
	}

	fn live_connection(&self) -> Result<(TrackerId, SessionHandle, StoreConnection)> {
		let feature = FeatureKind::SpatialAnchor;
		let gate = self.inner.gate();
		if !gate.is_usable(feature) {
			return Err(TrackingError::Unavailable {
				feature,
				reason: gate.diagnostic(feature),
			});
		}
		let (Some(tracker), Some(conn)) = (self.inner.tracker_id(), self.inner.native()) else {
			return Err(TrackingError::NotRunning(feature));
		};
		let session = self.inner.registry().snapshot().require_running()?;
		Ok((tracker, session, *conn))
	}

	fn submit(&mut self, op: StoreOp, callback: PersistCallback) -> Result<u64> {
		let (_, session, conn) = self.live_connection()?;
		self.next_ticket += 1;
		let ticket = self.next_ticket;
		let worker = match op {
			StoreOp::Save { .. } => &self.save,
			_ => &self.load,
		};
		let label = op.label();
		let incarnation = self.inner.loss_marks().incarnation(session);
		if let Err(e) = worker.submit(StoreJob {
			ticket,
			session,
			incarnation,
			conn,
			op,
			last_failure: None,
		}) {
			warn!(ticket, op = label, error = %e, "anchor.submit_failed");
			return Err(TrackingError::Native(NativeError::Unsupported(e.to_string())));
		}
		debug!(ticket, op = label, %session, "anchor.submitted");
		self.callbacks.insert(ticket, callback);
		Ok(ticket)
	}

	/// Advances one frame: delivers finished persistence results, creates
	/// pending anchors, then locates and reduces.
	pub fn update(&mut self, frame: &FrameContext) -> Result<ChangeSet<AnchorPayload>> {
		self.forget_stale(frame);
		self.dispatch_results(frame);
		self.create_pending(frame);
		self.inner.update(frame)
	}

	/// Stops both workers. Queued requests complete as cancelled.
	pub fn shutdown(&mut self, frame: &FrameContext) {
		self.save.shutdown();
		self.load.shutdown();
		self.dispatch_results(frame);
	}

	fn forget_stale(&mut self, frame: &FrameContext) {
		let current = frame.snapshot.session;
		let incarnation = self.inner.loss_marks().incarnation(current);
		let mut entries = self.directory.entries.lock();
		let before = entries.len();
		entries.retain(|_, e| e.session == current && e.incarnation == incarnation && !current.is_null());
		let forgotten = before - entries.len();
		if forgotten > 0 {
			info!(forgotten, %current, "anchor.forget_stale");
		}
	}

	fn dispatch_results(&mut self, frame: &FrameContext) {
		let current = frame.snapshot.session;
		let registry = Arc::clone(self.inner.registry());
		let marks = Arc::clone(self.inner.loss_marks());
		let live_incarnation = marks.incarnation(current);
		let tracker = self.inner.tracker_id().filter(|_| registry.is_current(current));
		let mut results = self.save.drain_results();
		results.extend(self.load.drain_results());
		for StoreResult {
			ticket,
			session,
			incarnation,
			outcome,
		} in results
		{
			let outcome = match tracker {
				Some(tracker) if session == current && incarnation == live_incarnation => {
					outcome.map(|reply| self.apply_reply(reply, tracker, session, incarnation))
				}
				_ => {
					if let Ok(StoreReply::Loaded { anchor, .. }) = &outcome
						&& registry.is_current(session)
						&& !marks.is_stale(session, incarnation)
					{
						self.runtime.destroy_anchor(*anchor);
					}
					debug!(ticket, %session, %current, "anchor.result_discarded");
					Err(PersistFailure::SessionLost)
				}
			};
			match self.callbacks.remove(&ticket) {
				Some(callback) => callback(outcome),
				None => warn!(ticket, "anchor.result_without_callback"),
			}
		}
	}

	fn apply_reply(&mut self, reply: StoreReply, tracker: TrackerId, session: SessionHandle, incarnation: u64) -> PersistSuccess {
		match reply {
			StoreReply::Saved { instance, name } => {
				if let Some(entry) = self.directory.entries.lock().get_mut(&instance) {
					entry.name = Some(name.clone());
					entry.persisted = true;
				}
				if !self.names.contains(&name) {
					self.names.push(name.clone());
				}
				PersistSuccess::Saved {
					id: TrackableId::new(tracker, instance),
					name,
				}
			}
			StoreReply::Loaded { name, anchor } => {
				let instance = self.directory.allocate();
				self.directory.entries.lock().insert(
					instance,
					AnchorEntry {
						session,
						incarnation,
						native: Some(anchor),
						requested: Pose::IDENTITY,
						name: Some(name.clone()),
						persisted: true,
					},
				);
				PersistSuccess::Loaded {
					id: TrackableId::new(tracker, instance),
					name,
				}
			}
			StoreReply::Erased { name } => {
				for entry in self.directory.entries.lock().values_mut() {
					if entry.name.as_deref() == Some(name.as_str()) {
						entry.persisted = false;
					}
				}
				self.names.retain(|n| *n != name);
				PersistSuccess::Erased { name }
			}
			StoreReply::Cleared => {
				for entry in self.directory.entries.lock().values_mut() {
					entry.persisted = false;
				}
				self.names.clear();
				PersistSuccess::Cleared
			}
			StoreReply::Listed(names) => {
				self.names = names.clone();
				PersistSuccess::Listed(names)
			}
		}
	}

	fn create_pending(&mut self, frame: &FrameContext) {
		if frame.snapshot.require_running().is_err() {
			return;
		}
		let Some(tracker) = self.inner.tracker_id() else { return };
		let pending: Vec<(u64, Pose)> = self
			.directory
			.entries
			.lock()
			.iter()
			.filter(|(_, e)| e.native.is_none())
			.map(|(instance, e)| (*instance, e.requested))
			.collect();
		for (instance, pose) in pending {
			let id = TrackableId::new(tracker, instance);
			match self.runtime.create_anchor(frame, pose) {
				Ok(native) => {
					let mut entries = self.directory.entries.lock();
					match entries.get_mut(&instance) {
						Some(entry) => entry.native = Some(native),
						None => {
							drop(entries);
							self.runtime.destroy_anchor(native);
							continue;
						}
					}
					debug!(%id, "anchor.created");
				}
				Err(e) => {
					warn!(%id, error = %e, "anchor.create_failed");
					self.directory.entries.lock().remove(&instance);
					self.creation_failures.push((id, e));
				}
			}
		}
	}
}

impl<R: AnchorRuntime, S: PersistentStore> Drop for Anchors<R, S> {
	fn drop(&mut self) {
		self.save.shutdown();
		self.load.shutdown();
		let registry = Arc::clone(self.inner.registry());
		let marks = Arc::clone(self.inner.loss_marks());
		let entries = std::mem::take(&mut *self.directory.entries.lock());
		for entry in entries.into_values() {
			if let Some(native) = entry.native
				&& registry.is_current(entry.session)
				&& !marks.is_stale(entry.session, entry.incarnation)
			{
				self.runtime.destroy_anchor(native);
			}
		}
	}
}
