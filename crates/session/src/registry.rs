//! Handle registry with atomic snapshot publication.
//!
//! # Mental model
//!
//! * Readers (frame thread, worker threads) load an `Arc<HandleSnapshot>` and
//!   work against that immutable copy. Loads never block.
//! * Writers are lifecycle transitions, possibly on a native callback thread.
//!   They build a replacement snapshot and publish it with a CAS retry loop.
//! * Every publication bumps [`HandleSnapshot::epoch`].
//!
//! Absence is encoded by null handles and [`SessionState::Unknown`]; nothing
//! here fails.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tessera_primitives::{InstanceHandle, SessionHandle, SpaceHandle};

use crate::{Result, SessionError, SessionState};

/// Immutable view of the current native handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleSnapshot {
	pub instance: InstanceHandle,
	pub session: SessionHandle,
	pub space: SpaceHandle,
	pub state: SessionState,
	/// Publication counter; strictly increases with every write.
	pub epoch: u64,
}

impl HandleSnapshot {
	/// Returns `Ok` when the snapshot names a session that is not being lost.
	pub fn require_session(&self) -> Result<SessionHandle> {
		if self.session.is_null() {
			return Err(SessionError::NoSession);
		}
		if self.state == SessionState::LossPending {
			return Err(SessionError::SessionLost);
		}
		Ok(self.session)
	}

	/// Like [`Self::require_session`], additionally requiring a running state.
	pub fn require_running(&self) -> Result<SessionHandle> {
		let session = self.require_session()?;
		if !self.state.is_running() {
			return Err(SessionError::NotRunning(self.state));
		}
		Ok(session)
	}
}

/// Single source of truth for instance, session and space handles.
#[derive(Debug, Default)]
pub struct HandleRegistry {
	current: ArcSwap<HandleSnapshot>,
}

impl HandleRegistry {
	/// Creates a registry holding sentinel values.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the current snapshot.
	pub fn snapshot(&self) -> Arc<HandleSnapshot> {
		self.current.load_full()
	}

	/// Current instance handle.
	pub fn instance(&self) -> InstanceHandle {
		self.current.load().instance
	}

	/// Current session handle.
	pub fn session(&self) -> SessionHandle {
		self.current.load().session
	}

	/// Current space handle. Re-read every frame; it changes on recentring.
	pub fn space(&self) -> SpaceHandle {
		self.current.load().space
	}

	/// Current session state.
	pub fn state(&self) -> SessionState {
		self.current.load().state
	}

	/// Returns true when `session` is still the registry's live session.
	pub fn is_current(&self, session: SessionHandle) -> bool {
		let snap = self.current.load();
		!session.is_null() && snap.session == session && snap.state != SessionState::LossPending
	}

	/// Publishes `f(current)` with a bumped epoch and returns the new snapshot.
	pub(crate) fn update(&self, f: impl Fn(&HandleSnapshot) -> HandleSnapshot) -> HandleSnapshot {
		let prev = self.current.rcu(|cur| {
			let mut next = f(cur);
			next.epoch = cur.epoch + 1;
			next
		});
		let mut next = f(&prev);
		next.epoch = prev.epoch + 1;
		next
	}

	/// Resets session-scoped handles; the instance handle is kept.
	pub(crate) fn reset_session(&self) -> HandleSnapshot {
		self.update(|cur| HandleSnapshot {
			instance: cur.instance,
			..HandleSnapshot::default()
		})
	}

	/// Resets every handle to its sentinel.
	pub(crate) fn reset_all(&self) -> HandleSnapshot {
		self.update(|_| HandleSnapshot::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_with_sentinels() {
		let registry = HandleRegistry::new();
		let snap = registry.snapshot();
		assert!(snap.session.is_null());
		assert_eq!(snap.state, SessionState::Unknown);
		assert_eq!(snap.require_session(), Err(SessionError::NoSession));
	}

	#[test]
	fn updates_bump_epoch() {
		let registry = HandleRegistry::new();
		let next = registry.update(|cur| HandleSnapshot {
			session: SessionHandle::from_raw(3),
			state: SessionState::Ready,
			..*cur
		});
		assert_eq!(next.epoch, 1);
		assert_eq!(*registry.snapshot(), next);
		assert_eq!(registry.session(), SessionHandle::from_raw(3));
		assert!(registry.is_current(SessionHandle::from_raw(3)));

		let reset = registry.reset_session();
		assert_eq!(reset.epoch, 2);
		assert!(registry.session().is_null());
	}

	#[test]
	fn loss_pending_fails_session_requirement() {
		let snap = HandleSnapshot {
			session: SessionHandle::from_raw(1),
			state: SessionState::LossPending,
			..HandleSnapshot::default()
		};
		assert_eq!(snap.require_session(), Err(SessionError::SessionLost));
		let idle = HandleSnapshot {
			state: SessionState::Idle,
			..snap
		};
		assert_eq!(idle.require_running(), Err(SessionError::NotRunning(SessionState::Idle)));
	}

	#[test]
	fn concurrent_writers_do_not_lose_updates() {
		let registry = Arc::new(HandleRegistry::new());
		let writers: Vec<_> = (0..4)
			.map(|_| {
				let registry = Arc::clone(&registry);
				std::thread::spawn(move || {
					for _ in 0..250 {
						registry.update(|cur| HandleSnapshot {
							space: SpaceHandle::from_raw(cur.space.raw() + 1),
							..*cur
						});
					}
				})
			})
			.collect();
		for w in writers {
			w.join().unwrap();
		}
		let snap = registry.snapshot();
		assert_eq!(snap.space.raw(), 1000);
		assert_eq!(snap.epoch, 1000);
	}
}
