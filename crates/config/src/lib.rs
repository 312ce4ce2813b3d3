//! Configuration for tessera.
//!
//! A single TOML file selects which features are enabled, parameterizes the
//! native trackers and bounds anchor persistence retries. Every section and
//! field is optional; missing values fall back to defaults.
//!
//! ```toml
//! [features]
//! image_tracking = false
//!
//! [persistence]
//! max_attempts = 32
//! ttl_ms = 5000
//! backoff_ms = 10
//! idle_exit_ms = 30000
//!
//! [planes]
//! mode = "horizontal"
//!
//! [markers]
//! kinds = ["qr_code", "april_tag"]
//!
//! [raycast]
//! max_distance = 8.0
//!
//! [[images]]
//! name = "poster"
//! size = [0.6, 0.9]
//! ```
//!
//! Unknown keys are rejected so typos surface at load time.

pub mod error;

use std::path::Path;
use std::time::Duration;

pub use error::{ConfigError, Result};
use serde::Deserialize;
use tessera_primitives::FeatureKind;
use tessera_session::FeatureGate;
use tessera_tracking::features::anchor::PersistenceOptions;
use tessera_tracking::features::image::{ImageLibrary, ReferenceImage};
use tessera_tracking::features::marker::{MarkerKind, MarkerTrackerConfig};
use tessera_tracking::features::plane::{PlaneDetectionMode, PlaneDetectorConfig};
use tessera_tracking::features::raycast::RaycastConfig;
use tessera_worker::RetryPolicy;
use tracing::debug;

/// Parsed configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub features: FeatureToggles,
	pub persistence: PersistenceConfig,
	pub planes: PlaneSection,
	pub markers: MarkerSection,
	pub raycast: RaycastSection,
	/// Reference images for image tracking.
	pub images: Vec<ImageEntry>,
}

/// Per-feature enable flags. Every feature defaults to enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureToggles {
	pub plane_detection: bool,
	pub image_tracking: bool,
	pub marker_tracking: bool,
	pub spatial_anchor: bool,
	pub raycast: bool,
	pub composition_layer: bool,
}

impl Default for FeatureToggles {
	fn default() -> Self {
		Self {
			plane_detection: true,
			image_tracking: true,
			marker_tracking: true,
			spatial_anchor: true,
			raycast: true,
			composition_layer: true,
		}
	}
}

impl FeatureToggles {
	pub fn enabled(&self, feature: FeatureKind) -> bool {
		match feature {
			FeatureKind::PlaneDetection => self.plane_detection,
			FeatureKind::ImageTracking => self.image_tracking,
			FeatureKind::MarkerTracking => self.marker_tracking,
			FeatureKind::SpatialAnchor => self.spatial_anchor,
			FeatureKind::Raycast => self.raycast,
			FeatureKind::CompositionLayer => self.composition_layer,
		}
	}

	/// Registers every feature with `gate` under its configured flag.
	pub fn register(&self, gate: &FeatureGate) {
		for feature in FeatureKind::ALL {
			let enabled = self.enabled(feature);
			debug!(%feature, enabled, "config.feature_registered");
			gate.register(feature, enabled);
		}
	}
}

/// Anchor persistence worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
	pub max_attempts: u32,
	pub ttl_ms: u64,
	pub backoff_ms: u64,
	/// Idle time after which a worker thread exits; 0 keeps it alive.
	pub idle_exit_ms: u64,
}

impl Default for PersistenceConfig {
	fn default() -> Self {
		let retry = RetryPolicy::default();
		Self {
			max_attempts: retry.max_attempts,
			ttl_ms: duration_ms(retry.ttl),
			backoff_ms: duration_ms(retry.backoff),
			idle_exit_ms: 0,
		}
	}
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PersistenceConfig {
	pub fn retry(&self) -> RetryPolicy {
		RetryPolicy {
			max_attempts: self.max_attempts,
			ttl: Duration::from_millis(self.ttl_ms),
			backoff: Duration::from_millis(self.backoff_ms),
		}
	}

	pub fn options(&self) -> PersistenceOptions {
		PersistenceOptions {
			retry: self.retry(),
			idle_exit: (self.idle_exit_ms > 0).then(|| Duration::from_millis(self.idle_exit_ms)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaneSection {
	pub mode: PlaneDetectionMode,
}

impl PlaneSection {
	pub fn detector(&self) -> PlaneDetectorConfig {
		PlaneDetectorConfig { mode: self.mode }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerSection {
	pub kinds: Vec<MarkerKind>,
}

impl Default for MarkerSection {
	fn default() -> Self {
		Self {
			kinds: vec![MarkerKind::QrCode],
		}
	}
}

impl MarkerSection {
	pub fn tracker(&self) -> MarkerTrackerConfig {
		MarkerTrackerConfig { kinds: self.kinds.clone() }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaycastSection {
	/// Hits beyond this distance are dropped; 0 disables the cap.
	pub max_distance: f32,
}

/// One `[[images]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageEntry {
	pub name: String,
	/// Printed size in meters; omitted lets the runtime estimate it.
	#[serde(default)]
	pub size: Option<[f32; 2]>,
}

impl Config {
	/// Parse a TOML string into a [`Config`].
	pub fn parse(input: &str) -> Result<Self> {
		let config: Config = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Load configuration from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
			path: path.to_path_buf(),
			error: e,
		})?;
		let config = Self::parse(&content)?;
		debug!(path = %path.display(), "config.loaded");
		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		if self.persistence.max_attempts == 0 {
			return Err(ConfigError::Invalid("persistence.max_attempts must be at least 1".into()));
		}
		if self.persistence.ttl_ms == 0 {
			return Err(ConfigError::Invalid("persistence.ttl_ms must be positive".into()));
		}
		if !(self.raycast.max_distance >= 0.0) {
			return Err(ConfigError::Invalid(format!("raycast.max_distance is {}", self.raycast.max_distance)));
		}
		if self.features.marker_tracking && self.markers.kinds.is_empty() {
			return Err(ConfigError::Invalid("marker tracking is enabled with no marker kinds".into()));
		}
		Ok(())
	}

	pub fn raycast(&self) -> RaycastConfig {
		RaycastConfig {
			max_distance: self.raycast.max_distance,
		}
	}

	/// Reference image library for the image tracker. Per-image checks run at
	/// tracker creation.
	pub fn image_library(&self) -> ImageLibrary {
		ImageLibrary {
			images: self.images.iter().map(|i| ReferenceImage::new(i.name.clone(), i.size)).collect(),
			max_tracked: 0,
		}
	}
}

#[cfg(test)]
mod tests;
