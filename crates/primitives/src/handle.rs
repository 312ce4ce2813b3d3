//! Opaque 64-bit handles naming native runtime objects.
//!
//! Zero is the "none" sentinel for every handle kind. Callers treat a null
//! handle as "not ready" rather than as an error.

macro_rules! native_handle {
	($(#[$meta:meta])* $name:ident, $tag:literal) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
		pub struct $name(u64);

		impl $name {
			/// The null handle.
			pub const NULL: Self = Self(0);

			/// Wraps a raw native value.
			pub const fn from_raw(raw: u64) -> Self {
				Self(raw)
			}

			/// Returns the raw native value.
			pub const fn raw(self) -> u64 {
				self.0
			}

			/// Returns true for the null sentinel.
			pub const fn is_null(self) -> bool {
				self.0 == 0
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				if self.is_null() {
					write!(f, concat!($tag, "#null"))
				} else {
					write!(f, concat!($tag, "#{:x}"), self.0)
				}
			}
		}
	};
}

native_handle!(
	/// Handle of the native runtime instance.
	InstanceHandle,
	"instance"
);

native_handle!(
	/// Handle of the active runtime session.
	///
	/// Non-zero values are only valid between the session-create and
	/// session-destroy lifecycle events.
	SessionHandle,
	"session"
);

native_handle!(
	/// Handle of the reference space poses are expressed in.
	///
	/// Changes independently of the session (e.g. on recentring), so it must be
	/// re-read from the handle registry instead of cached.
	SpaceHandle,
	"space"
);
