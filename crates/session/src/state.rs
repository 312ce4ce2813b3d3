/// Lifecycle state of the runtime session, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SessionState {
	#[default]
	Unknown,
	Idle,
	Ready,
	Synchronized,
	Visible,
	Focused,
	Stopping,
	LossPending,
	Exiting,
}

impl SessionState {
	/// True for states in which frames are produced and trackers may run.
	pub const fn is_running(self) -> bool {
		matches!(self, Self::Ready | Self::Synchronized | Self::Visible | Self::Focused)
	}

	/// True once the session is on its way out.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::LossPending | Self::Exiting)
	}
}
