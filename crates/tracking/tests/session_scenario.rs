//! Every subsystem driven over one simulated session, through loss and
//! recovery.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tessera_primitives::{FeatureKind, Location, Pose, TrackingState};
use tessera_tracking::features::anchor::{Anchors, PersistenceOptions};
use tessera_tracking::features::layer::{CompositionLayers, LayerDesc, LayerEvent, LayerShape};
use tessera_tracking::features::marker::{MarkerKind, MarkerPayload, MarkerTrackerConfig};
use tessera_tracking::features::plane::{PlaneAlignment, PlaneDetectorConfig, PlanePayload};
use tessera_tracking::features::raycast::{Ray, RaycastConfig, RaycastPayload, RaycastTarget, Raycasts};
use tessera_tracking::sim::{SimObject, SimSession, SimTracker, SimWorld};
use tessera_tracking::{RawEntity, TrackableSubsystem, TrackingError};
use tessera_worker::WorkerRegistry;

const ALL: [FeatureKind; 5] = [
	FeatureKind::PlaneDetection,
	FeatureKind::MarkerTracking,
	FeatureKind::Raycast,
	FeatureKind::SpatialAnchor,
	FeatureKind::CompositionLayer,
];

struct Rig {
	world: Arc<SimWorld>,
	host: SimSession,
	planes: TrackableSubsystem<SimTracker<PlanePayload>>,
	markers: TrackableSubsystem<SimTracker<MarkerPayload>>,
	raycasts: Raycasts<SimTracker<RaycastPayload>>,
	anchors: Anchors<SimWorld, SimWorld>,
	layers: CompositionLayers<SimWorld>,
}

impl Rig {
	fn new() -> Self {
		let _ = tracing_subscriber::fmt::try_init();
		let world = SimWorld::new();
		let host = SimSession::with_features(&ALL);
		let lifecycle = host.lifecycle();
		Self {
			planes: TrackableSubsystem::new(SimTracker::new(&world), Arc::clone(lifecycle), PlaneDetectorConfig::default()),
			markers: TrackableSubsystem::new(
				SimTracker::new(&world),
				Arc::clone(lifecycle),
				MarkerTrackerConfig {
					kinds: vec![MarkerKind::QrCode],
				},
			),
			raycasts: Raycasts::new(SimTracker::new(&world), Arc::clone(lifecycle), RaycastConfig::default()),
			anchors: Anchors::new(Arc::clone(&world), Arc::clone(&world), Arc::clone(lifecycle), WorkerRegistry::new(), PersistenceOptions::default()),
			layers: CompositionLayers::new(Arc::clone(&world), Arc::clone(lifecycle)),
			world,
			host,
		}
	}

	fn trackers(&self) -> usize {
		[FeatureKind::PlaneDetection, FeatureKind::MarkerTracking, FeatureKind::Raycast]
			.into_iter()
			.map(|f| self.world.live(SimObject::Tracker(f)))
			.sum()
	}
}

fn floor() -> RawEntity<PlanePayload> {
	RawEntity {
		instance: 10,
		location: Location::tracking(Pose::IDENTITY),
		payload: PlanePayload {
			alignment: PlaneAlignment::HorizontalUp,
			extents: [4.0, 4.0],
			boundary: vec![[-2.0, -2.0], [2.0, -2.0], [2.0, 2.0], [-2.0, 2.0]],
		},
	}
}

fn marker(instance: u64, kind: MarkerKind) -> RawEntity<MarkerPayload> {
	RawEntity {
		instance,
		location: Location::tracking(Pose::at([0.0, 1.0, -1.0])),
		payload: MarkerPayload {
			kind,
			id: None,
			text: Some("hello".into()),
			size: [0.1, 0.1],
		},
	}
}

#[test]
fn nothing_runs_without_a_session() {
	let mut rig = Rig::new();
	let frame = rig.host.frame(0);
	assert!(matches!(rig.planes.update(&frame), Err(TrackingError::Unavailable { .. })));
	assert!(matches!(rig.anchors.update(&frame), Err(TrackingError::Unavailable { .. })));
	assert!(rig.layers.update(&frame).is_empty());
	assert_eq!(rig.trackers(), 0);
}

#[test]
fn full_session_through_loss_and_recovery() {
	let mut rig = Rig::new();
	rig.host.start();
	rig.world.set_planes(vec![floor()]);
	rig.world.set_markers(vec![marker(20, MarkerKind::QrCode), marker(21, MarkerKind::Aruco)]);

	let frame = rig.host.frame(1);
	assert_eq!(rig.planes.update(&frame).unwrap().added.len(), 1);
	let markers = rig.markers.update(&frame).unwrap();
	assert_eq!(markers.added.len(), 1, "only requested marker kinds are reported");
	assert_eq!(markers.added[0].payload.kind, MarkerKind::QrCode);
	assert!(rig.raycasts.update(&frame).unwrap().is_empty());
	assert!(rig.anchors.update(&frame).unwrap().is_empty());
	assert_eq!(rig.trackers(), 3);

	let ray = rig
		.raycasts
		.add(Ray {
			origin: [0.0, 1.5, 0.0],
			direction: [0.0, -1.0, 0.0],
		})
		.unwrap();
	let anchor = rig.anchors.add(Pose::at([0.5, 0.0, -0.5])).unwrap();
	let layer = rig
		.layers
		.create_layer(LayerDesc {
			shape: LayerShape::Quad { size: [1.0, 1.0] },
			pose: Pose::at([0.0, 1.5, -2.0]),
			width: 1024,
			height: 1024,
			sort_order: 1,
		})
		.unwrap();

	let frame = rig.host.frame(2);
	let hits = rig.raycasts.update(&frame).unwrap();
	assert_eq!(hits.added[0].id, ray);
	assert_eq!(hits.added[0].payload.target, RaycastTarget::Plane);
	assert_eq!(hits.added[0].pose, Pose::at([0.0, 0.0, 0.0]));
	let anchors = rig.anchors.update(&frame).unwrap();
	assert_eq!(anchors.added[0].id, anchor);
	assert_eq!(anchors.added[0].tracking, TrackingState::Tracking);

	rig.host.lose();
	assert_eq!(rig.world.live(SimObject::Swapchain), 1, "swapchains wait for the render thread");
	assert_eq!(rig.host.lifecycle().run_deferred_teardown(), 1);
	assert_eq!(rig.world.live(SimObject::Swapchain), 0);

	let frame = rig.host.frame(3);
	assert_eq!(rig.planes.update(&frame).unwrap().removed.len(), 1);
	assert_eq!(rig.markers.update(&frame).unwrap().removed.len(), 1);
	assert_eq!(rig.raycasts.update(&frame).unwrap().removed, vec![ray]);
	assert_eq!(rig.anchors.update(&frame).unwrap().removed, vec![anchor]);
	assert_eq!(rig.layers.update(&frame), vec![LayerEvent::Lost(layer)]);
	assert_eq!(rig.trackers(), 0);
	assert_eq!(rig.world.live(SimObject::Store), 0);
	assert_eq!(rig.world.destroyed_swapchains().len(), 1);

	rig.host.destroy();
	rig.host.start();
	let frame = rig.host.frame(4);
	assert_eq!(rig.planes.update(&frame).unwrap().added.len(), 1);
	assert!(rig.anchors.update(&frame).unwrap().is_empty(), "anchors do not survive the session");
	let events = rig.layers.update(&frame);
	let [LayerEvent::Recreated { old, new }] = events[..] else {
		panic!("expected one recreation, got {events:?}");
	};
	assert_eq!(old, layer);
	assert_ne!(new, layer);
	assert_eq!(rig.layers.layers(), &[new]);
	assert_eq!(rig.world.live(SimObject::Swapchain), 1);
	assert_eq!(rig.world.destroyed_swapchains().len(), 1, "lost swapchains are destroyed once");
}

#[test]
fn orderly_end_destroys_everything() {
	let mut rig = Rig::new();
	rig.host.start();
	rig.world.set_planes(vec![floor()]);
	let frame = rig.host.frame(1);
	rig.planes.update(&frame).unwrap();
	rig.anchors.update(&frame).unwrap();
	rig.anchors.add(Pose::IDENTITY).unwrap();
	rig.anchors.update(&rig.host.frame(2)).unwrap();

	rig.host.end();
	let frame = rig.host.frame(3);
	assert_eq!(rig.planes.update(&frame).unwrap().removed.len(), 1);
	assert_eq!(rig.anchors.update(&frame).unwrap().removed.len(), 1);
	assert_eq!(rig.trackers(), 0);
	assert_eq!(rig.world.live(SimObject::Store), 0);
	assert!(matches!(rig.planes.update(&rig.host.frame(4)), Err(TrackingError::Unavailable { .. })));
}
