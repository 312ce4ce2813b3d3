/// Rigid transform: position in meters and orientation as a unit quaternion
/// `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
	/// Translation in meters.
	pub position: [f32; 3],
	/// Orientation quaternion `[x, y, z, w]`.
	pub orientation: [f32; 4],
}

impl Pose {
	/// Identity pose at the space origin.
	pub const IDENTITY: Self = Self {
		position: [0.0, 0.0, 0.0],
		orientation: [0.0, 0.0, 0.0, 1.0],
	};

	/// Pose at `position` with identity orientation.
	pub const fn at(position: [f32; 3]) -> Self {
		Self {
			position,
			orientation: [0.0, 0.0, 0.0, 1.0],
		}
	}
}

impl Default for Pose {
	fn default() -> Self {
		Self::IDENTITY
	}
}

/// Tracking confidence of a trackable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrackingState {
	/// Not tracked; the pose is stale or unknown.
	#[default]
	None,
	/// Pose is valid but tracked with reduced confidence.
	Limited,
	/// Pose is fully tracked.
	Tracking,
}

bitflags::bitflags! {
	/// Validity bits reported by the native space-location call.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct LocationFlags: u32 {
		/// Orientation is valid.
		const ORIENTATION_VALID = 1 << 0;
		/// Position is valid.
		const POSITION_VALID = 1 << 1;
		/// Orientation is actively tracked.
		const ORIENTATION_TRACKED = 1 << 2;
		/// Position is actively tracked.
		const POSITION_TRACKED = 1 << 3;
	}
}

impl LocationFlags {
	/// Both validity bits.
	pub const VALID: Self = Self::ORIENTATION_VALID.union(Self::POSITION_VALID);
	/// Both tracked bits.
	pub const TRACKED: Self = Self::ORIENTATION_TRACKED.union(Self::POSITION_TRACKED);

	/// Classifies the flags into a tracking state.
	///
	/// Fully valid and tracked is [`TrackingState::Tracking`], valid without
	/// tracking is [`TrackingState::Limited`], anything less is
	/// [`TrackingState::None`].
	pub fn tracking_state(self) -> TrackingState {
		if !self.contains(Self::VALID) {
			TrackingState::None
		} else if self.contains(Self::TRACKED) {
			TrackingState::Tracking
		} else {
			TrackingState::Limited
		}
	}
}

/// Outcome of locating one entity this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
	/// The runtime produced a pose.
	Located {
		/// Located pose.
		pose: Pose,
		/// Confidence of the pose.
		tracking: TrackingState,
	},
	/// The runtime could not locate the entity this frame.
	Failed,
}

impl Location {
	/// Builds a location from native flags, failing when the pose is not valid.
	pub fn from_flags(pose: Pose, flags: LocationFlags) -> Self {
		match flags.tracking_state() {
			TrackingState::None => Self::Failed,
			tracking => Self::Located { pose, tracking },
		}
	}

	/// Location that is fully tracked at `pose`.
	pub const fn tracking(pose: Pose) -> Self {
		Self::Located {
			pose,
			tracking: TrackingState::Tracking,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_classify_tracking_state() {
		assert_eq!(LocationFlags::empty().tracking_state(), TrackingState::None);
		assert_eq!(LocationFlags::POSITION_VALID.tracking_state(), TrackingState::None);
		assert_eq!(LocationFlags::VALID.tracking_state(), TrackingState::Limited);
		assert_eq!((LocationFlags::VALID | LocationFlags::TRACKED).tracking_state(), TrackingState::Tracking);
		assert_eq!((LocationFlags::VALID | LocationFlags::POSITION_TRACKED).tracking_state(), TrackingState::Limited);
	}

	#[test]
	fn invalid_flags_fail_location() {
		assert_eq!(Location::from_flags(Pose::IDENTITY, LocationFlags::ORIENTATION_VALID), Location::Failed);
		assert_eq!(
			Location::from_flags(Pose::IDENTITY, LocationFlags::VALID),
			Location::Located {
				pose: Pose::IDENTITY,
				tracking: TrackingState::Limited,
			}
		);
	}
}
