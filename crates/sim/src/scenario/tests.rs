use pretty_assertions::assert_eq;

use super::*;

fn options(frames: u32, lose_at: Option<u32>) -> ScenarioOptions {
	ScenarioOptions {
		frames,
		lose_at,
		frame_delay: Duration::from_millis(2),
	}
}

#[test]
fn uninterrupted_run_reports_every_feature() {
	let config = Config::parse("[[images]]\nname = \"poster\"\nsize = [0.6, 0.9]\n").unwrap();
	let summary = Scenario::new(&config).run(&options(40, None));

	assert_eq!(summary.sessions, 1);
	let planes = summary.tallies[&FeatureKind::PlaneDetection];
	assert_eq!(planes.added, 2);
	assert!(planes.updated > 0, "the floor grows");
	assert_eq!(planes.removed, 2, "orderly end reports everything removed");
	assert_eq!(summary.tallies[&FeatureKind::ImageTracking].added, 1);
	assert_eq!(summary.tallies[&FeatureKind::MarkerTracking].added, 1);
	assert_eq!(summary.tallies[&FeatureKind::Raycast].added, 1);
	assert_eq!(summary.tallies[&FeatureKind::SpatialAnchor].added, 1);
	assert_eq!(summary.saved, 1);
	assert_eq!(summary.persisted, vec![ANCHOR_NAME.to_string()]);
	assert!(summary.persist_failures.is_empty());
	assert!(summary.workers.iter().all(|w| !w.running));
}

#[test]
fn lost_session_is_recovered_and_anchor_restored() {
	let summary = Scenario::new(&Config::default()).run(&options(60, Some(30)));

	assert_eq!(summary.sessions, 2);
	let planes = summary.tallies[&FeatureKind::PlaneDetection];
	assert_eq!(planes.added, 4, "both planes are reported again in the new session");
	assert_eq!(planes.removed, 4);
	assert!(planes.unavailable > 0);
	assert!(summary.layer_events >= 3, "lost, recreated, then lost at shutdown");
	assert_eq!(summary.saved, 1);
	assert_eq!(summary.loaded, 1);
	assert!(summary.tallies[&FeatureKind::SpatialAnchor].added >= 3);
}

#[test]
fn disabled_features_never_run() {
	let config = Config::parse("[features]\nraycast = false\nspatial_anchor = false\n").unwrap();
	let summary = Scenario::new(&config).run(&options(10, None));

	let raycast = summary.tallies[&FeatureKind::Raycast];
	assert_eq!(raycast.added, 0);
	assert_eq!(raycast.unavailable, 11);
	assert_eq!(summary.saved, 0);
	assert!(summary.persisted.is_empty());
	assert!(summary.tallies[&FeatureKind::PlaneDetection].added > 0);
}
