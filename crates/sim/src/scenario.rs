//! Scripted session run against [`SimWorld`].
//!
//! The script grows a floor plane, adds a wall, shows a QR code and every
//! configured reference image, keeps one raycast and one anchor alive per
//! session, saves the anchor once and restores it after a session loss.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_config::Config;
use tessera_primitives::{FeatureKind, Location, Pose, SessionHandle, TrackableId};
use tessera_session::InitStatus;
use tessera_tracking::features::anchor::{Anchors, PersistFailure, PersistSuccess};
use tessera_tracking::features::image::{ImageLibrary, ImagePayload};
use tessera_tracking::features::layer::{CompositionLayers, LayerDesc, LayerShape};
use tessera_tracking::features::marker::{MarkerKind, MarkerPayload};
use tessera_tracking::features::plane::{PlaneAlignment, PlanePayload};
use tessera_tracking::features::raycast::{Ray, RaycastPayload, Raycasts};
use tessera_tracking::sim::{SimSession, SimTracker, SimWorld};
use tessera_tracking::{ChangeSet, FrameContext, RawEntity, TrackableSubsystem, TrackingError};
use tessera_worker::{WorkerRecord, WorkerRegistry};
use tracing::{debug, info, warn};

/// Name the scripted anchor is persisted under.
pub const ANCHOR_NAME: &str = "home";

/// Frames between a session loss and the replacement session.
const RECOVERY_FRAMES: u32 = 3;

const FRAME_NANOS: i64 = 11_111_111;

type Outcome = Result<PersistSuccess, PersistFailure>;

#[derive(Debug, Clone, Copy)]
pub struct ScenarioOptions {
	pub frames: u32,
	/// Frame at which the session is lost, if any.
	pub lose_at: Option<u32>,
	/// Wall-clock pause after each frame.
	pub frame_delay: Duration,
}

/// Change counts for one feature over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
	pub added: usize,
	pub updated: usize,
	pub removed: usize,
	/// Frames the feature could not run.
	pub unavailable: usize,
}

#[derive(Debug, Default)]
pub struct Summary {
	pub tallies: BTreeMap<FeatureKind, Tally>,
	pub layer_events: usize,
	pub sessions: u32,
	pub saved: usize,
	pub loaded: usize,
	pub persist_failures: Vec<PersistFailure>,
	/// Store contents at shutdown.
	pub persisted: Vec<String>,
	pub workers: Vec<WorkerRecord>,
}

/// Requests issued once per session.
#[derive(Debug, Default)]
struct SessionRequests {
	session: SessionHandle,
	ray: Option<TrackableId>,
	anchor: Option<TrackableId>,
	save_sent: bool,
	load_sent: bool,
}

pub struct Scenario {
	world: Arc<SimWorld>,
	host: SimSession,
	library: ImageLibrary,
	planes: TrackableSubsystem<SimTracker<PlanePayload>>,
	images: TrackableSubsystem<SimTracker<ImagePayload>>,
	markers: TrackableSubsystem<SimTracker<MarkerPayload>>,
	raycasts: Raycasts<SimTracker<RaycastPayload>>,
	anchors: Anchors<SimWorld, SimWorld>,
	layers: CompositionLayers<SimWorld>,
	workers: WorkerRegistry,
	outcomes: Arc<Mutex<Vec<Outcome>>>,
	requests: SessionRequests,
	layer_requested: bool,
	saved_once: bool,
	summary: Summary,
}

impl Scenario {
	/// Builds every subsystem from `config`. Features are registered and
	/// initialized the way a host does at startup.
	pub fn new(config: &Config) -> Self {
		let world = SimWorld::new();
		let host = SimSession::with_features(&[]);
		let lifecycle = host.lifecycle();
		let gate = lifecycle.gate();
		config.features.register(gate);
		for feature in FeatureKind::ALL {
			gate.set_init(feature, InitStatus::Ready);
		}

		let workers = WorkerRegistry::new();
		let library = config.image_library();
		Self {
			planes: TrackableSubsystem::new(SimTracker::new(&world), Arc::clone(lifecycle), config.planes.detector()),
			images: TrackableSubsystem::new(SimTracker::new(&world), Arc::clone(lifecycle), library.clone()),
			markers: TrackableSubsystem::new(SimTracker::new(&world), Arc::clone(lifecycle), config.markers.tracker()),
			raycasts: Raycasts::new(SimTracker::new(&world), Arc::clone(lifecycle), config.raycast()),
			anchors: Anchors::new(Arc::clone(&world), Arc::clone(&world), Arc::clone(lifecycle), workers.clone(), config.persistence.options()),
			layers: CompositionLayers::new(Arc::clone(&world), Arc::clone(lifecycle)),
			library,
			workers,
			outcomes: Arc::default(),
			requests: SessionRequests::default(),
			layer_requested: false,
			saved_once: false,
			summary: Summary::default(),
			world,
			host,
		}
	}

	pub fn run(mut self, options: &ScenarioOptions) -> Summary {
		self.host.start();
		self.summary.sessions = 1;

		for t in 1..=options.frames {
			self.script(t);
			if options.lose_at == Some(t) {
				info!(frame = t, "sim.session_lost");
				self.host.lose();
				let ran = self.host.lifecycle().run_deferred_teardown();
				debug!(frame = t, ran, "sim.render_teardown");
			}
			if options.lose_at.is_some_and(|at| t == at + RECOVERY_FRAMES) {
				self.host.destroy();
				let session = self.host.start();
				self.summary.sessions += 1;
				info!(frame = t, %session, "sim.session_restarted");
			}
			let frame = self.host.frame(i64::from(t) * FRAME_NANOS);
			self.step(&frame);
			if !options.frame_delay.is_zero() {
				std::thread::sleep(options.frame_delay);
			}
		}

		self.host.end();
		self.host.lifecycle().run_deferred_teardown();
		let frame = self.host.frame(i64::from(options.frames + 1) * FRAME_NANOS);
		self.step(&frame);
		self.anchors.shutdown(&frame);
		self.collect_outcomes();

		let mut summary = std::mem::take(&mut self.summary);
		summary.persisted = self.world.stored_names();
		summary.workers = self.workers.snapshots();
		summary
	}

	fn script(&self, t: u32) {
		let grow = 1.0 + (t.min(20) as f32) * 0.1;
		let mut planes = Vec::new();
		if t >= 2 {
			planes.push(plane(1, Pose::IDENTITY, PlaneAlignment::HorizontalUp, [grow, grow]));
		}
		if t >= 8 {
			planes.push(plane(2, Pose::at([0.0, 1.2, -2.5]), PlaneAlignment::Vertical, [3.0, 2.4]));
		}
		self.world.set_planes(planes);

		if t >= 4 {
			self.world.set_markers(vec![RawEntity {
				instance: 30,
				location: Location::tracking(Pose::at([0.4, 1.0, -1.0])),
				payload: MarkerPayload {
					kind: MarkerKind::QrCode,
					id: None,
					text: Some("https://example.invalid/tessera".into()),
					size: [0.12, 0.12],
				},
			}]);
		}

		if t >= 6 {
			let images = self
				.library
				.images
				.iter()
				.zip(40u64..)
				.map(|(image, instance)| RawEntity {
					instance,
					location: Location::tracking(Pose::at([-0.5, 1.4, -1.8])),
					payload: ImagePayload {
						name: image.name.clone(),
						physical_size: image.physical_size.unwrap_or([0.2, 0.2]),
					},
				})
				.collect();
			self.world.set_images(images);
		}
	}

	fn step(&mut self, frame: &FrameContext) {
		if frame.snapshot.session != self.requests.session {
			self.requests = SessionRequests {
				session: frame.snapshot.session,
				..SessionRequests::default()
			};
		}

		let planes = self.planes.update(frame);
		self.tally(FeatureKind::PlaneDetection, planes);
		let images = self.images.update(frame);
		self.tally(FeatureKind::ImageTracking, images);
		let markers = self.markers.update(frame);
		self.tally(FeatureKind::MarkerTracking, markers);
		let raycasts = self.raycasts.update(frame);
		self.tally(FeatureKind::Raycast, raycasts);
		let anchors = self.anchors.update(frame);
		self.tally(FeatureKind::SpatialAnchor, anchors);
		self.summary.layer_events += self.layers.update(frame).len();
		self.collect_outcomes();

		self.issue_requests();
	}

	fn issue_requests(&mut self) {
		if self.requests.ray.is_none() && self.raycasts.subsystem().is_running() {
			let ray = Ray {
				origin: [0.0, 1.6, 0.0],
				direction: [0.0, -0.8, -0.6],
			};
			self.requests.ray = self.raycasts.add(ray).ok();
		}

		if self.requests.anchor.is_none() && self.anchors.subsystem().is_running() {
			self.requests.anchor = self.anchors.add(Pose::at([0.0, 0.0, -1.5])).ok();
		}

		if let Some(anchor) = self.requests.anchor
			&& !self.saved_once
			&& !self.requests.save_sent
			&& self.anchors.get(anchor).is_some()
		{
			let tx = Arc::clone(&self.outcomes);
			match self.anchors.save(anchor, ANCHOR_NAME, move |o| tx.lock().push(o)) {
				Ok(ticket) => {
					debug!(ticket, %anchor, "sim.save_requested");
					self.requests.save_sent = true;
				}
				Err(e) => debug!(%anchor, error = %e, "sim.save_deferred"),
			}
		}

		if self.saved_once && self.summary.sessions > 1 && !self.requests.load_sent && self.anchors.subsystem().is_running() {
			let tx = Arc::clone(&self.outcomes);
			if self.anchors.load(ANCHOR_NAME, move |o| tx.lock().push(o)).is_ok() {
				self.requests.load_sent = true;
			}
		}

		if !self.layer_requested {
			let desc = LayerDesc {
				shape: LayerShape::Quad { size: [0.8, 0.45] },
				pose: Pose::at([0.0, 1.5, -1.2]),
				width: 1280,
				height: 720,
				sort_order: 1,
			};
			match self.layers.create_layer(desc) {
				Ok(layer) => {
					info!(%layer, "sim.layer_created");
					self.layer_requested = true;
				}
				Err(TrackingError::Unavailable { .. }) => {}
				Err(e) => {
					warn!(error = %e, "sim.layer_rejected");
					self.layer_requested = true;
				}
			}
		}
	}

	fn collect_outcomes(&mut self) {
		let outcomes = std::mem::take(&mut *self.outcomes.lock());
		for outcome in outcomes {
			match outcome {
				Ok(PersistSuccess::Saved { id, name }) => {
					info!(%id, %name, "sim.anchor_saved");
					self.saved_once = true;
					self.summary.saved += 1;
				}
				Ok(PersistSuccess::Loaded { id, name }) => {
					info!(%id, %name, "sim.anchor_loaded");
					self.summary.loaded += 1;
				}
				Ok(other) => debug!(?other, "sim.persist_done"),
				Err(failure) => {
					warn!(error = %failure, "sim.persist_failed");
					self.summary.persist_failures.push(failure);
				}
			}
		}
	}

	fn tally<P>(&mut self, feature: FeatureKind, result: tessera_tracking::Result<ChangeSet<P>>) {
		let tally = self.summary.tallies.entry(feature).or_default();
		match result {
			Ok(changes) => {
				tally.added += changes.added.len();
				tally.updated += changes.updated.len();
				tally.removed += changes.removed.len();
			}
			Err(error) => {
				tally.unavailable += 1;
				debug!(%feature, %error, "sim.feature_unavailable");
			}
		}
	}
}

fn plane(instance: u64, pose: Pose, alignment: PlaneAlignment, extents: [f32; 2]) -> RawEntity<PlanePayload> {
	let [w, h] = extents.map(|e| e / 2.0);
	RawEntity {
		instance,
		location: Location::tracking(pose),
		payload: PlanePayload {
			alignment,
			extents,
			boundary: vec![[-w, -h], [w, -h], [w, h], [-w, h]],
		},
	}
}

#[cfg(test)]
mod tests;
