//! Error types for session-scoped operations.

use thiserror::Error;

use crate::SessionState;

/// Errors raised by operations that need a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
	/// No session has been created, or it was destroyed.
	#[error("no active session")]
	NoSession,
	/// The session is being lost; its handles may already be invalid.
	#[error("session lost")]
	SessionLost,
	/// The session exists but is not in a running state.
	#[error("session not running (state {0:?})")]
	NotRunning(SessionState),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
