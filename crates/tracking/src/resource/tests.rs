use std::sync::atomic::{AtomicU64, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::error::NativeError;

#[derive(Default)]
struct Recorder {
	next: AtomicU64,
	reject: Mutex<bool>,
	destroyed: Mutex<Vec<u64>>,
}

impl ResourceBinding for Recorder {
	type Native = u64;
	type Config = &'static str;

	fn create(&self, _session: SessionHandle, _config: &Self::Config) -> Result<u64, NativeError> {
		if *self.reject.lock() {
			return Err(NativeError::Code(-3));
		}
		Ok(self.next.fetch_add(1, Ordering::Relaxed) + 1)
	}

	fn destroy(&self, native: &u64) {
		self.destroyed.lock().push(*native);
	}
}

fn manager() -> (ResourceManager<Recorder>, Arc<Recorder>) {
	let binding = Arc::new(Recorder::default());
	(ResourceManager::new("test", Arc::clone(&binding), Arc::new(LossMarks::new())), binding)
}

fn s(raw: u64) -> SessionHandle {
	SessionHandle::from_raw(raw)
}

#[test]
fn ensure_is_idempotent_for_live_session() {
	let (mut mgr, binding) = manager();
	let id = mgr.ensure(None, s(1), &"a").unwrap();
	assert_eq!(mgr.ensure(Some(id), s(1), &"a").unwrap(), id);
	assert_eq!(mgr.len(), 1);
	assert!(binding.destroyed.lock().is_empty());
}

#[test]
fn ensure_replaces_record_of_old_session() {
	let (mut mgr, binding) = manager();
	let old = mgr.ensure(None, s(1), &"a").unwrap();
	let new = mgr.ensure(Some(old), s(2), &"a").unwrap();
	assert_ne!(old, new);
	assert_eq!(mgr.len(), 1);
	assert_eq!(*binding.destroyed.lock(), vec![1]);
	assert_eq!(mgr.get(new).map(|r| r.session), Some(s(2)));
}

#[test]
fn ensure_without_session_fails() {
	let (mut mgr, _) = manager();
	assert_eq!(mgr.ensure(None, SessionHandle::NULL, &"a"), Err(ResourceError::Session(SessionError::NoSession)));
}

#[test]
fn lost_session_marks_make_records_stale() {
	let (mut mgr, binding) = manager();
	let id = mgr.ensure(None, s(1), &"a").unwrap();
	mgr.marks().mark(s(1));
	assert!(!mgr.is_live(id, s(1)));
	assert_eq!(mgr.ensure(Some(id), s(1), &"a"), Err(ResourceError::Session(SessionError::SessionLost)));
	assert_eq!(*binding.destroyed.lock(), vec![1]);
}

#[test]
fn reused_handle_starts_a_fresh_incarnation() {
	let (mut mgr, binding) = manager();
	mgr.marks().begin(s(1));
	let old = mgr.ensure(None, s(1), &"a").unwrap();
	mgr.marks().on_session_destroyed(s(1));
	assert!(mgr.marks().is_lost(s(1)));

	mgr.marks().on_session_created(s(1));
	assert!(!mgr.marks().is_lost(s(1)));
	assert!(!mgr.is_live(old, s(1)));
	let new = mgr.ensure(Some(old), s(1), &"a").unwrap();
	assert_ne!(new, old);
	assert!(mgr.is_live(new, s(1)));
	assert_eq!(mgr.get(new).map(|r| r.incarnation), Some(2));
	assert_eq!(*binding.destroyed.lock(), vec![1]);
}

#[test]
fn superseded_incarnation_is_reaped() {
	let (mut mgr, _) = manager();
	let old = mgr.ensure(None, s(1), &"a").unwrap();
	mgr.marks().begin(s(1));
	let stale = mgr.reap_stale(s(1));
	assert_eq!(stale.len(), 1);
	assert_eq!(stale[0].0, old);
	assert!(mgr.is_empty());
	assert!(mgr.marks().is_stale(s(1), 0));
	assert!(!mgr.marks().is_stale(s(1), 1));
}

#[test]
fn creation_failure_is_reported_without_record() {
	let (mut mgr, binding) = manager();
	*binding.reject.lock() = true;
	assert_eq!(mgr.ensure(None, s(1), &"a"), Err(ResourceError::Rejected(NativeError::Code(-3))));
	assert!(mgr.is_empty());
}

#[test]
fn destroy_cascades_children_first() {
	let (mut mgr, binding) = manager();
	let parent = mgr.create(s(1), &"layer", None).unwrap();
	let child = mgr.create(s(1), &"swapchain", Some(parent)).unwrap();
	assert!(mgr.destroy(parent));
	assert!(mgr.get(child).is_none());
	assert_eq!(*binding.destroyed.lock(), vec![2, 1]);
	assert!(!mgr.destroy(parent));
}

#[test]
fn child_of_stale_parent_is_rejected() {
	let (mut mgr, _) = manager();
	let parent = mgr.create(s(1), &"layer", None).unwrap();
	assert_eq!(mgr.create(s(2), &"swapchain", Some(parent)), Err(ResourceError::Stale(parent)));
}

#[test]
fn reconfigure_recreates_from_snapshot() {
	let (mut mgr, binding) = manager();
	let id = mgr.create(s(1), &"cfg", None).unwrap();
	let next = mgr.reconfigure(id, s(2)).unwrap();
	assert_ne!(id, next);
	let record = mgr.get(next).unwrap();
	assert_eq!(record.config, "cfg");
	assert_eq!(record.session, s(2));
	assert_eq!(*binding.destroyed.lock(), vec![1]);
	assert_eq!(mgr.reconfigure(id, s(2)), Err(ResourceError::Stale(id)));
}

#[test]
fn reap_stale_destroys_only_stale_records() {
	let (mut mgr, binding) = manager();
	let old = mgr.create(s(1), &"old", None).unwrap();
	let live = mgr.create(s(2), &"live", None).unwrap();
	let reaped = mgr.reap_stale(s(2));
	assert_eq!(reaped, vec![(old, "old")]);
	assert!(mgr.is_live(live, s(2)));
	assert_eq!(*binding.destroyed.lock(), vec![1]);
}

#[test]
fn decouple_flags_records_until_reaped() {
	let (mut mgr, binding) = manager();
	let id = mgr.create(s(1), &"a", None).unwrap();
	assert_eq!(mgr.decouple(s(1)), 1);
	assert_eq!(mgr.decouple(s(1)), 0);
	assert!(mgr.get(id).unwrap().decoupled);
	assert!(binding.destroyed.lock().is_empty());
	mgr.reap_stale(s(1));
	assert!(mgr.is_empty());
}

#[test]
fn drop_destroys_everything() {
	let binding = Arc::new(Recorder::default());
	{
		let mut mgr = ResourceManager::new("test", Arc::clone(&binding), Arc::new(LossMarks::new()));
		let parent = mgr.create(s(1), &"p", None).unwrap();
		mgr.create(s(1), &"c", Some(parent)).unwrap();
		mgr.create(s(1), &"q", None).unwrap();
	}
	let mut destroyed = binding.destroyed.lock().clone();
	destroyed.sort();
	assert_eq!(destroyed, vec![1, 2, 3]);
}

#[test]
fn loss_marks_listener_marks_once() {
	let marks = LossMarks::new();
	marks.on_session_destroyed(s(4));
	marks.on_session_destroyed(s(4));
	assert!(marks.is_lost(s(4)));
	for raw in 10..10 + LOST_HISTORY as u64 {
		marks.mark(s(raw));
	}
	assert!(!marks.is_lost(s(4)));
}
