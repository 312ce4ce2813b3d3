//! Session-scoped native resource records.
//!
//! # Purpose
//!
//! Own the native handles a feature creates against a session (trackers,
//! layers, store connections) and make sure none of them outlives it.
//!
//! # Mental model
//!
//! * Records live in a generation-checked [`Arena`]; a [`ResourceId`] minted
//!   before a destroy never resolves to a later record.
//! * Every record remembers the session that created it and a snapshot of its
//!   creation parameters.
//! * Session loss is observed on a native callback thread. [`LossMarks`]
//!   records the lost session there; the manager applies the mark on the
//!   frame thread, where it alone touches records.
//! * A record is stale when its session is not the current one, or when the
//!   incarnation it was created in has been marked lost or superseded by a
//!   later session reusing the same handle. Stale records are only destroyed, never reused.
//!
//! # Invariants
//!
//! * [`ResourceManager::ensure`] never returns a stale record.
//! * [`ResourceManager::destroy`] tears dependents down before their parent.
//! * Dropping the manager destroys every remaining record.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_primitives::{Arena, ResourceId, SessionHandle};
use tessera_session::{SessionError, SessionListener, TeardownScheduler};
use tracing::{debug, info, warn};

use crate::binding::ResourceBinding;
use crate::error::ResourceError;

const LOST_HISTORY: usize = 8;

#[derive(Debug, Default)]
struct MarkState {
	incarnations: FxHashMap<SessionHandle, u64>,
	lost: Vec<(SessionHandle, u64)>,
}

impl MarkState {
	fn current(&self, session: SessionHandle) -> u64 {
		self.incarnations.get(&session).copied().unwrap_or(0)
	}
}

/// Sessions reported lost, shared between the callback thread and a manager.
///
/// Marks are kept per incarnation: the runtime may hand out a handle value it
/// used before, and a session created under that value starts unmarked.
#[derive(Debug, Default)]
pub struct LossMarks {
	state: Mutex<MarkState>,
}

impl LossMarks {
	/// Creates an empty mark set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts a new incarnation of `session` and returns it.
	pub fn begin(&self, session: SessionHandle) -> u64 {
		let mut state = self.state.lock();
		let incarnation = state.incarnations.entry(session).or_insert(0);
		*incarnation += 1;
		*incarnation
	}

	/// Current incarnation of `session`.
	pub fn incarnation(&self, session: SessionHandle) -> u64 {
		self.state.lock().current(session)
	}

	/// Records the current incarnation of `session` as lost.
	pub fn mark(&self, session: SessionHandle) {
		let mut state = self.state.lock();
		let key = (session, state.current(session));
		if state.lost.contains(&key) {
			return;
		}
		if state.lost.len() == LOST_HISTORY {
			state.lost.remove(0);
		}
		state.lost.push(key);
	}

	/// Returns true when the current incarnation of `session` was marked lost.
	pub fn is_lost(&self, session: SessionHandle) -> bool {
		let state = self.state.lock();
		state.lost.contains(&(session, state.current(session)))
	}

	/// Returns true when `incarnation` of `session` is superseded or lost.
	pub fn is_stale(&self, session: SessionHandle, incarnation: u64) -> bool {
		let state = self.state.lock();
		incarnation != state.current(session) || state.lost.contains(&(session, incarnation))
	}
}

impl SessionListener for LossMarks {
	fn on_session_created(&self, session: SessionHandle) {
		self.begin(session);
	}

	fn on_session_lost(&self, session: SessionHandle, _teardown: &TeardownScheduler) {
		self.mark(session);
	}

	fn on_session_destroyed(&self, session: SessionHandle) {
		self.mark(session);
	}
}

/// One live native resource.
#[derive(Debug, Clone)]
pub struct ActiveResource<N, C> {
	pub native: N,
	/// Session that created the resource.
	pub session: SessionHandle,
	/// Incarnation of `session` the resource was created in.
	pub incarnation: u64,
	/// Creation parameters, reused on reconfigure.
	pub config: C,
	/// Record that must outlive this one.
	pub parent: Option<ResourceId>,
	/// Set once the owning session was lost; the record only awaits destroy.
	pub decoupled: bool,
}

type Record<B> = ActiveResource<<B as ResourceBinding>::Native, <B as ResourceBinding>::Config>;

/// Lifecycle manager for one kind of session-scoped native resource.
pub struct ResourceManager<B: ResourceBinding> {
	label: &'static str,
	binding: Arc<B>,
	marks: Arc<LossMarks>,
	records: Arena<Record<B>>,
}

impl<B: ResourceBinding> std::fmt::Debug for ResourceManager<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceManager")
			.field("label", &self.label)
			.field("records", &self.records.len())
			.finish_non_exhaustive()
	}
}

impl<B: ResourceBinding> ResourceManager<B> {
	/// Creates an empty manager. `label` names the resource kind in logs.
	pub fn new(label: &'static str, binding: Arc<B>, marks: Arc<LossMarks>) -> Self {
		Self {
			label,
			binding,
			marks,
			records: Arena::new(),
		}
	}

	pub fn binding(&self) -> &Arc<B> {
		&self.binding
	}

	/// Loss marks to subscribe to the session lifecycle.
	pub fn marks(&self) -> &Arc<LossMarks> {
		&self.marks
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn get(&self, id: ResourceId) -> Option<&Record<B>> {
		self.records.get(id)
	}

	pub fn native(&self, id: ResourceId) -> Option<&B::Native> {
		self.records.get(id).map(|r| &r.native)
	}

	/// Ids of every record, including stale ones.
	pub fn ids(&self) -> Vec<ResourceId> {
		self.records.ids()
	}

	/// Returns true when `id` names a record usable with `current`.
	pub fn is_live(&self, id: ResourceId, current: SessionHandle) -> bool {
		self.records.get(id).is_some_and(|r| !self.is_stale(r, current))
	}

	fn is_stale(&self, record: &Record<B>, current: SessionHandle) -> bool {
		record.decoupled || current.is_null() || record.session != current || self.marks.is_stale(record.session, record.incarnation)
	}

	/// Returns a live record for `session`, creating one when needed.
	///
	/// `existing` is returned unchanged when it is still live. A stale
	/// `existing` is destroyed first.
	pub fn ensure(&mut self, existing: Option<ResourceId>, session: SessionHandle, config: &B::Config) -> Result<ResourceId, ResourceError> {
		if let Some(id) = existing {
			if self.is_live(id, session) {
				return Ok(id);
			}
			if self.records.contains(id) {
				debug!(resource = self.label, %id, "resource.ensure_replaces_stale");
				self.destroy(id);
			}
		}
		self.create(session, config, None)
	}

	/// Creates a record for `session`, optionally owned by `parent`.
	pub fn create(&mut self, session: SessionHandle, config: &B::Config, parent: Option<ResourceId>) -> Result<ResourceId, ResourceError> {
		if session.is_null() {
			return Err(SessionError::NoSession.into());
		}
		if self.marks.is_lost(session) {
			return Err(SessionError::SessionLost.into());
		}
		if let Some(parent) = parent
			&& !self.is_live(parent, session)
		{
			return Err(ResourceError::Stale(parent));
		}

		let native = self.binding.create(session, config).map_err(|e| {
			warn!(resource = self.label, %session, error = %e, "resource.create_failed");
			ResourceError::Rejected(e)
		})?;
		let id = self.records.insert(ActiveResource {
			native,
			session,
			incarnation: self.marks.incarnation(session),
			config: config.clone(),
			parent,
			decoupled: false,
		});
		info!(resource = self.label, %id, %session, "resource.created");
		Ok(id)
	}

	/// Destroys `id` after its dependents. Returns false for unknown ids.
	pub fn destroy(&mut self, id: ResourceId) -> bool {
		let children: Vec<ResourceId> = self.records.iter().filter(|(_, r)| r.parent == Some(id)).map(|(child, _)| child).collect();
		for child in children {
			self.destroy(child);
		}
		let Some(record) = self.records.remove(id) else {
			return false;
		};
		self.binding.destroy(&record.native);
		debug!(resource = self.label, %id, session = %record.session, decoupled = record.decoupled, "resource.destroyed");
		true
	}

	/// Recreates `id` from its configuration snapshot against `session`.
	///
	/// Dependents are destroyed with the old record and must be recreated by
	/// the caller. Returns the new id.
	pub fn reconfigure(&mut self, id: ResourceId, session: SessionHandle) -> Result<ResourceId, ResourceError> {
		let Some(record) = self.records.get(id) else {
			return Err(ResourceError::Stale(id));
		};
		let config = record.config.clone();
		let parent = record.parent;
		self.destroy(id);
		let parent = parent.filter(|p| self.is_live(*p, session));
		self.create(session, &config, parent)
	}

	/// Marks every record owned by `session` as decoupled.
	pub fn decouple(&mut self, session: SessionHandle) -> usize {
		let mut count = 0;
		for (_, record) in self.records.iter_mut() {
			if record.session == session && !record.decoupled {
				record.decoupled = true;
				count += 1;
			}
		}
		if count > 0 {
			info!(resource = self.label, %session, count, "resource.decoupled");
		}
		count
	}

	/// Applies loss marks and destroys every record stale against `current`.
	///
	/// Returns the stale ids with their configuration snapshots.
	pub fn reap_stale(&mut self, current: SessionHandle) -> Vec<(ResourceId, B::Config)> {
		for (_, record) in self.records.iter_mut() {
			if !record.decoupled && self.marks.is_stale(record.session, record.incarnation) {
				record.decoupled = true;
			}
		}
		let stale: Vec<(ResourceId, B::Config)> = self
			.records
			.iter()
			.filter(|(_, r)| self.is_stale(r, current))
			.map(|(id, r)| (id, r.config.clone()))
			.collect();
		for (id, _) in &stale {
			self.destroy(*id);
		}
		stale
	}

	/// Destroys every record.
	pub fn destroy_all(&mut self) {
		let roots: Vec<ResourceId> = self.records.iter().filter(|(_, r)| r.parent.is_none()).map(|(id, _)| id).collect();
		for id in roots {
			self.destroy(id);
		}
		for id in self.records.ids() {
			self.destroy(id);
		}
	}
}

impl<B: ResourceBinding> Drop for ResourceManager<B> {
	fn drop(&mut self) {
		self.destroy_all();
	}
}

#[cfg(test)]
mod tests;
