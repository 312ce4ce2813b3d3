/// Execution classes used for worker naming and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Blocking persistence I/O (anchor save).
	PersistSave,
	/// Blocking persistence I/O (anchor load, erase).
	PersistLoad,
	/// Other blocking native calls kept off the frame thread.
	IoBlocking,
}

impl TaskClass {
	/// Stable label used in logs and thread names.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::PersistSave => "persist_save",
			Self::PersistLoad => "persist_load",
			Self::IoBlocking => "io_blocking",
		}
	}
}
