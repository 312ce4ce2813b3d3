use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::TaskClass;

/// Snapshot for one registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
	pub name: String,
	pub class: TaskClass,
	pub running: bool,
	/// Number of thread (re)starts.
	pub starts: usize,
	pub processed: u64,
	pub pending: usize,
	pub last_exit: Option<String>,
}

/// In-memory worker registry for status snapshots.
#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
	inner: Arc<RwLock<HashMap<String, WorkerRecord>>>,
}

impl WorkerRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies `f` to the record named `name`, creating it first if needed.
	pub fn update(&self, name: &str, class: TaskClass, f: impl FnOnce(&mut WorkerRecord)) {
		let mut guard = self.inner.write();
		let record = guard.entry(name.to_string()).or_insert_with(|| WorkerRecord {
			name: name.to_string(),
			class,
			running: false,
			starts: 0,
			processed: 0,
			pending: 0,
			last_exit: None,
		});
		f(record);
	}

	/// Removes one record.
	pub fn remove(&self, name: &str) {
		self.inner.write().remove(name);
	}

	/// Returns one record.
	pub fn get(&self, name: &str) -> Option<WorkerRecord> {
		self.inner.read().get(name).cloned()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<WorkerRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_creates_then_mutates() {
		let registry = WorkerRegistry::new();
		registry.update("b", TaskClass::PersistLoad, |r| r.pending = 2);
		registry.update("a", TaskClass::PersistSave, |r| r.processed += 1);
		registry.update("a", TaskClass::PersistSave, |r| r.processed += 1);

		let snaps = registry.snapshots();
		assert_eq!(snaps.len(), 2);
		assert_eq!(snaps[0].name, "a");
		assert_eq!(snaps[0].processed, 2);
		assert_eq!(snaps[1].pending, 2);

		registry.remove("a");
		assert!(registry.get("a").is_none());
	}
}
