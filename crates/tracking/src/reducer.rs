//! Trackable change reducer.
//!
//! # Purpose
//!
//! Fold one frame's observations into the live trackable set and report the
//! difference as added, updated and removed lists.
//!
//! # Rules
//!
//! * An observed id absent from the live set is added. A failed location gives
//!   it the identity pose with [`TrackingState::None`].
//! * An observed id present in the live set is updated only if its pose,
//!   tracking state or payload changed. A failed location keeps the previous
//!   pose and degrades tracking to [`TrackingState::None`].
//! * A live id not observed this frame is removed.
//! * A failed poll is no change at all.
//! * A duplicate id within one observation is resolved last-wins.
//!
//! Each id appears in at most one output list. Ordering of `added` and
//! `updated` follows first observation; `removed` is ascending.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tessera_primitives::{Location, Pose, TrackableId, TrackingState};
use tracing::trace;

use crate::error::NativeError;

/// Live record of one trackable entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Trackable<P> {
	pub id: TrackableId,
	pub pose: Pose,
	pub tracking: TrackingState,
	pub payload: P,
}

/// One observation with identity assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrackable<P> {
	pub id: TrackableId,
	pub location: Location,
	pub payload: P,
}

/// Result of one native poll.
pub type PollOutcome<P> = Result<Vec<RawTrackable<P>>, NativeError>;

/// Difference produced by one [`reduce`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<P> {
	pub added: Vec<Trackable<P>>,
	pub updated: Vec<Trackable<P>>,
	pub removed: Vec<TrackableId>,
}

impl<P> Default for ChangeSet<P> {
	fn default() -> Self {
		Self {
			added: Vec::new(),
			updated: Vec::new(),
			removed: Vec::new(),
		}
	}
}

impl<P> ChangeSet<P> {
	/// Returns true when nothing changed.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
	}

	/// Total number of entries across all three lists.
	pub fn len(&self) -> usize {
		self.added.len() + self.updated.len() + self.removed.len()
	}

	/// Appends `later`, which must describe changes after `self`.
	pub fn merge(&mut self, later: ChangeSet<P>) {
		self.added.extend(later.added);
		self.updated.extend(later.updated);
		self.removed.extend(later.removed);
	}
}

/// Live trackables keyed by id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackableSet<P> {
	records: BTreeMap<TrackableId, Trackable<P>>,
}

impl<P> Default for TrackableSet<P> {
	fn default() -> Self {
		Self { records: BTreeMap::new() }
	}
}

impl<P> TrackableSet<P> {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn get(&self, id: TrackableId) -> Option<&Trackable<P>> {
		self.records.get(&id)
	}

	pub fn contains(&self, id: TrackableId) -> bool {
		self.records.contains_key(&id)
	}

	/// Records in ascending id order.
	pub fn iter(&self) -> impl Iterator<Item = &Trackable<P>> {
		self.records.values()
	}

	/// Empties the set, returning the removed ids in ascending order.
	pub fn clear(&mut self) -> Vec<TrackableId> {
		std::mem::take(&mut self.records).into_keys().collect()
	}
}

/// Applies one frame's observations to `live` and returns the difference.
pub fn reduce<P: Clone + PartialEq>(live: &mut TrackableSet<P>, observed: PollOutcome<P>) -> ChangeSet<P> {
	let observed = match observed {
		Ok(observed) => observed,
		Err(error) => {
			trace!(%error, "reduce.poll_failed");
			return ChangeSet::default();
		}
	};

	// Last-wins dedup that keeps first-seen order.
	let mut order: Vec<TrackableId> = Vec::with_capacity(observed.len());
	let mut latest: FxHashMap<TrackableId, RawTrackable<P>> = FxHashMap::default();
	for raw in observed {
		let id = raw.id;
		if latest.insert(id, raw).is_none() {
			order.push(id);
		}
	}

	let mut changes = ChangeSet::default();
	for id in &order {
		let Some(raw) = latest.remove(id) else { continue };
		match live.records.get_mut(id) {
			Some(prev) => {
				let next = match raw.location {
					Location::Located { pose, tracking } => Trackable {
						id: *id,
						pose,
						tracking,
						payload: raw.payload,
					},
					Location::Failed => Trackable {
						id: *id,
						pose: prev.pose,
						tracking: TrackingState::None,
						payload: raw.payload,
					},
				};
				if *prev != next {
					*prev = next.clone();
					changes.updated.push(next);
				}
			}
			None => {
				let (pose, tracking) = match raw.location {
					Location::Located { pose, tracking } => (pose, tracking),
					Location::Failed => (Pose::IDENTITY, TrackingState::None),
				};
				let record = Trackable {
					id: *id,
					pose,
					tracking,
					payload: raw.payload,
				};
				live.records.insert(*id, record.clone());
				changes.added.push(record);
			}
		}
	}

	let seen: FxHashSet<TrackableId> = order.into_iter().collect();
	live.records.retain(|id, _| {
		let keep = seen.contains(id);
		if !keep {
			changes.removed.push(*id);
		}
		keep
	});

	trace!(
		added = changes.added.len(),
		updated = changes.updated.len(),
		removed = changes.removed.len(),
		"reduce.done"
	);
	changes
}

#[cfg(test)]
mod tests;
