/// Runtime feature guarded by the availability gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
	/// Horizontal and vertical plane detection.
	PlaneDetection,
	/// Reference image tracking.
	ImageTracking,
	/// Fiducial marker and QR code tracking.
	MarkerTracking,
	/// Spatial anchors and anchor persistence.
	SpatialAnchor,
	/// Raycasts against tracked geometry.
	Raycast,
	/// Composition layers.
	CompositionLayer,
}

impl FeatureKind {
	/// Every feature, in declaration order.
	pub const ALL: [Self; 6] = [
		Self::PlaneDetection,
		Self::ImageTracking,
		Self::MarkerTracking,
		Self::SpatialAnchor,
		Self::Raycast,
		Self::CompositionLayer,
	];

	/// Stable label used in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::PlaneDetection => "plane_detection",
			Self::ImageTracking => "image_tracking",
			Self::MarkerTracking => "marker_tracking",
			Self::SpatialAnchor => "spatial_anchor",
			Self::Raycast => "raycast",
			Self::CompositionLayer => "composition_layer",
		}
	}
}

impl std::fmt::Display for FeatureKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
