use std::sync::Arc;

use parking_lot::RwLock;
use tessera_primitives::ListenerToken;

/// Subscriber list keyed by caller-provided tokens.
///
/// Subscribing with a token that is already present replaces that listener
/// in place, keeping its notification position. Notification order is
/// otherwise subscription order.
pub struct Listeners<L: ?Sized> {
	entries: RwLock<Vec<(ListenerToken, Arc<L>)>>,
}

impl<L: ?Sized> Default for Listeners<L> {
	fn default() -> Self {
		Self {
			entries: RwLock::new(Vec::new()),
		}
	}
}

impl<L: ?Sized> std::fmt::Debug for Listeners<L> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let tokens: Vec<_> = self.entries.read().iter().map(|(t, _)| *t).collect();
		f.debug_struct("Listeners").field("tokens", &tokens).finish()
	}
}

impl<L: ?Sized> Listeners<L> {
	/// Creates an empty list.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces the listener for `token`. Returns true on replace.
	pub fn subscribe(&self, token: ListenerToken, listener: Arc<L>) -> bool {
		let mut entries = self.entries.write();
		if let Some(slot) = entries.iter_mut().find(|(t, _)| *t == token) {
			slot.1 = listener;
			return true;
		}
		entries.push((token, listener));
		false
	}

	/// Removes the listener for `token`. Returns true when one was present.
	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|(t, _)| *t != token);
		entries.len() != before
	}

	/// Number of subscribers.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true without subscribers.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Calls `f` for every listener, outside the lock.
	pub fn for_each(&self, mut f: impl FnMut(&L)) {
		let snapshot: Vec<Arc<L>> = self.entries.read().iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in &snapshot {
			f(listener);
		}
	}
}
