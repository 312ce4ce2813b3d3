//! Plane detection.

use serde::Deserialize;
use tessera_primitives::FeatureKind;

use crate::binding::{TrackablePayload, TrackerConfig};
use crate::subsystem::TrackableSubsystem;

/// Orientation class of a detected plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneAlignment {
	/// Floor-like; normal points up.
	HorizontalUp,
	/// Ceiling-like; normal points down.
	HorizontalDown,
	Vertical,
	Arbitrary,
}

impl PlaneAlignment {
	pub fn is_horizontal(self) -> bool {
		matches!(self, Self::HorizontalUp | Self::HorizontalDown)
	}
}

/// Which plane orientations the caller wants reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneDetectionMode {
	#[default]
	Any,
	Horizontal,
	Vertical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanePayload {
	pub alignment: PlaneAlignment,
	/// Width and length of the plane's bounding rectangle, in meters.
	pub extents: [f32; 2],
	/// Boundary polygon in plane space, counter-clockwise.
	pub boundary: Vec<[f32; 2]>,
}

impl TrackablePayload for PlanePayload {
	const FEATURE: FeatureKind = FeatureKind::PlaneDetection;
}

/// Parameters of the native plane tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneDetectorConfig {
	pub mode: PlaneDetectionMode,
}

impl TrackerConfig<PlanePayload> for PlaneDetectorConfig {
	fn accepts(&self, payload: &PlanePayload) -> bool {
		match self.mode {
			PlaneDetectionMode::Any => true,
			PlaneDetectionMode::Horizontal => payload.alignment.is_horizontal(),
			PlaneDetectionMode::Vertical => payload.alignment == PlaneAlignment::Vertical,
		}
	}
}

/// Plane detection subsystem over a native binding `B`.
pub type PlaneDetection<B> = TrackableSubsystem<B>;

#[cfg(test)]
mod tests {
	use super::*;

	fn plane(alignment: PlaneAlignment) -> PlanePayload {
		PlanePayload {
			alignment,
			extents: [1.0, 1.0],
			boundary: Vec::new(),
		}
	}

	#[test]
	fn mode_filters_alignment() {
		let horizontal = PlaneDetectorConfig {
			mode: PlaneDetectionMode::Horizontal,
		};
		assert!(horizontal.accepts(&plane(PlaneAlignment::HorizontalDown)));
		assert!(!horizontal.accepts(&plane(PlaneAlignment::Vertical)));

		let vertical = PlaneDetectorConfig {
			mode: PlaneDetectionMode::Vertical,
		};
		assert!(!vertical.accepts(&plane(PlaneAlignment::Arbitrary)));
		assert!(PlaneDetectorConfig::default().accepts(&plane(PlaneAlignment::Arbitrary)));
	}
}
