//! Fiducial marker tracking.

use serde::Deserialize;
use tessera_primitives::FeatureKind;

use crate::binding::{TrackablePayload, TrackerConfig};
use crate::error::ResourceError;
use crate::subsystem::TrackableSubsystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
	QrCode,
	MicroQrCode,
	Aruco,
	AprilTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPayload {
	pub kind: MarkerKind,
	/// Dictionary id for ArUco and AprilTag markers.
	pub id: Option<u32>,
	/// Decoded content for QR codes.
	pub text: Option<String>,
	/// Edge lengths in meters.
	pub size: [f32; 2],
}

impl TrackablePayload for MarkerPayload {
	const FEATURE: FeatureKind = FeatureKind::MarkerTracking;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerTrackerConfig {
	pub kinds: Vec<MarkerKind>,
}

impl TrackerConfig<MarkerPayload> for MarkerTrackerConfig {
	fn validate(&self) -> Result<(), ResourceError> {
		if self.kinds.is_empty() {
			return Err(ResourceError::InvalidConfig("no marker kinds requested".into()));
		}
		Ok(())
	}

	fn accepts(&self, payload: &MarkerPayload) -> bool {
		self.kinds.contains(&payload.kind)
	}
}

pub type MarkerTracking<B> = TrackableSubsystem<B>;
