use std::sync::Arc;

use pretty_assertions::assert_eq;
use tessera_session::HandleRegistry;

use super::*;

#[test]
fn empty_input_yields_defaults() {
	let config = Config::parse("").unwrap();
	assert_eq!(config, Config::default());
	assert!(FeatureKind::ALL.iter().all(|f| config.features.enabled(*f)));
	assert_eq!(config.persistence.retry(), RetryPolicy::default());
	assert_eq!(config.persistence.options().idle_exit, None);
	assert_eq!(config.markers.tracker().kinds, vec![MarkerKind::QrCode]);
}

#[test]
fn full_document() {
	let config = Config::parse(
		r#"
		[features]
		image_tracking = false

		[persistence]
		max_attempts = 8
		ttl_ms = 2500
		backoff_ms = 20
		idle_exit_ms = 1000

		[planes]
		mode = "vertical"

		[markers]
		kinds = ["aruco", "april_tag"]

		[raycast]
		max_distance = 4.5

		[[images]]
		name = "poster"
		size = [0.6, 0.9]

		[[images]]
		name = "logo"
		"#,
	)
	.unwrap();

	assert!(!config.features.enabled(FeatureKind::ImageTracking));
	assert!(config.features.enabled(FeatureKind::PlaneDetection));
	assert_eq!(
		config.persistence.options(),
		PersistenceOptions {
			retry: RetryPolicy {
				max_attempts: 8,
				ttl: Duration::from_millis(2500),
				backoff: Duration::from_millis(20),
			},
			idle_exit: Some(Duration::from_secs(1)),
		}
	);
	assert_eq!(config.planes.detector().mode, PlaneDetectionMode::Vertical);
	assert_eq!(config.markers.kinds, vec![MarkerKind::Aruco, MarkerKind::AprilTag]);
	assert_eq!(config.raycast().max_distance, 4.5);
	let library = config.image_library();
	assert_eq!(library.images.len(), 2);
	assert_eq!(library.images[0], ReferenceImage::new("poster", Some([0.6, 0.9])));
	assert_eq!(library.images[1].physical_size, None);
}

#[test]
fn unknown_keys_are_rejected() {
	assert!(matches!(Config::parse("[features]\nplanes = true\n"), Err(ConfigError::Toml(_))));
	assert!(matches!(Config::parse("[gaze]\n"), Err(ConfigError::Toml(_))));
	assert!(matches!(Config::parse("[planes]\nmode = \"diagonal\"\n"), Err(ConfigError::Toml(_))));
}

#[test]
fn unusable_values_are_invalid() {
	for input in [
		"[persistence]\nmax_attempts = 0\n",
		"[persistence]\nttl_ms = 0\n",
		"[raycast]\nmax_distance = -1.0\n",
		"[markers]\nkinds = []\n",
	] {
		assert!(matches!(Config::parse(input), Err(ConfigError::Invalid(_))), "{input}");
	}
	assert!(Config::parse("[features]\nmarker_tracking = false\n[markers]\nkinds = []\n").is_ok());
}

#[test]
fn toggles_register_with_gate() {
	let gate = FeatureGate::new(Arc::new(HandleRegistry::new()));
	let config = Config::parse("[features]\nraycast = false\n").unwrap();
	config.features.register(&gate);
	assert!(!gate.is_enabled(FeatureKind::Raycast));
	assert!(gate.is_enabled(FeatureKind::SpatialAnchor));
}

#[test]
fn load_reads_file() {
	let dir = tempfile::tempdir().expect("create tempdir");
	let path = dir.path().join("tessera.toml");
	std::fs::write(&path, "[planes]\nmode = \"horizontal\"\n").expect("write config");
	let config = Config::load(&path).unwrap();
	assert_eq!(config.planes.mode, PlaneDetectionMode::Horizontal);

	let missing = dir.path().join("missing.toml");
	let err = Config::load(&missing).unwrap_err();
	assert!(matches!(err, ConfigError::Io { ref path, .. } if *path == missing));
}
