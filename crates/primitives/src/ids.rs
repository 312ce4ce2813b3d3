use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identifier of one native tracker instance.
///
/// Allocated from a process-wide counter, so a tracker recreated after a
/// session change never reuses the id of its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerId(u32);

static NEXT_TRACKER: AtomicU32 = AtomicU32::new(1);

impl TrackerId {
	/// Allocates a fresh tracker id.
	pub fn next() -> Self {
		Self(NEXT_TRACKER.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw id value.
	pub const fn raw(self) -> u32 {
		self.0
	}
}

impl std::fmt::Display for TrackerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "T{}", self.0)
	}
}

/// Composite key of one trackable: owning tracker plus the per-instance id the
/// runtime reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackableId {
	/// Tracker that reported the entity.
	pub tracker: TrackerId,
	/// Runtime-assigned id, unique within the tracker's lifetime.
	pub instance: u64,
}

impl TrackableId {
	/// Creates an identifier.
	pub const fn new(tracker: TrackerId, instance: u64) -> Self {
		Self { tracker, instance }
	}
}

impl std::fmt::Display for TrackableId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.tracker, self.instance)
	}
}

/// Caller-chosen key for listener subscriptions.
///
/// Subscribing twice with the same token replaces the earlier listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1 << 63);

impl ListenerToken {
	/// Allocates a token from a range callers do not use for hand-picked values.
	pub fn unique() -> Self {
		Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tracker_ids_are_unique() {
		let a = TrackerId::next();
		let b = TrackerId::next();
		assert_ne!(a, b);
		assert_ne!(TrackableId::new(a, 1), TrackableId::new(b, 1));
	}

	#[test]
	fn unique_tokens_stay_out_of_low_range() {
		let token = ListenerToken::unique();
		assert!(token.0 >= 1 << 63);
		assert_ne!(token, ListenerToken::unique());
	}
}
