//! In-process simulated runtime.
//!
//! [`SimWorld`] implements every binding trait against scripted state, and
//! [`SimSession`] drives the session lifecycle the way a host runtime would.
//! Both are meant for tests and demos; nothing here talks to hardware.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tessera_primitives::{FeatureKind, InstanceHandle, Location, LocationFlags, Pose, SessionHandle, SpaceHandle};
use tessera_session::{FeatureGate, HandleRegistry, InitStatus, SessionEvent, SessionLifecycle, SessionState, Transition};
use tracing::trace;

use crate::binding::{RawEntity, ResourceBinding, SpaceLocator, TrackablePayload, TrackerBinding};
use crate::error::NativeError;
use crate::features::anchor::{AnchorNative, AnchorRuntime, PersistFailure, PersistentStore, StoreConnection};
use crate::features::image::{ImageLibrary, ImagePayload};
use crate::features::layer::{LayerCapabilities, LayerDesc, LayerRuntime, SwapchainDesc};
use crate::features::marker::{MarkerPayload, MarkerTrackerConfig};
use crate::features::plane::{PlaneDetectorConfig, PlanePayload};
use crate::features::raycast::{Ray, RaycastBinding, RaycastConfig, RaycastPayload, RaycastTarget};
use crate::subsystem::FrameContext;

/// Kind of a live simulated native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimObject {
	Tracker(FeatureKind),
	Anchor,
	Store,
	Layer,
	Swapchain,
}

#[derive(Debug)]
struct WorldState {
	planes: Vec<RawEntity<PlanePayload>>,
	images: Vec<RawEntity<ImagePayload>>,
	markers: Vec<RawEntity<MarkerPayload>>,
	failing_polls: u32,
	rejected: FxHashSet<FeatureKind>,
	live: BTreeMap<u64, (SimObject, SessionHandle)>,
	anchor_poses: BTreeMap<u64, Pose>,
	anchor_flags: LocationFlags,
	rays: BTreeMap<u64, (u64, Ray)>,
	store: BTreeMap<String, Pose>,
	low_quality: u32,
	store_latency: Duration,
	capabilities: LayerCapabilities,
	destroyed_swapchains: Vec<u64>,
}

impl Default for WorldState {
	fn default() -> Self {
		Self {
			planes: Vec::new(),
			images: Vec::new(),
			markers: Vec::new(),
			failing_polls: 0,
			rejected: FxHashSet::default(),
			live: BTreeMap::new(),
			anchor_poses: BTreeMap::new(),
			anchor_flags: LocationFlags::VALID | LocationFlags::TRACKED,
			rays: BTreeMap::new(),
			store: BTreeMap::new(),
			low_quality: 0,
			store_latency: Duration::ZERO,
			capabilities: LayerCapabilities {
				max_layers: 4,
				max_width: 2048,
				max_height: 2048,
			},
			destroyed_swapchains: Vec::new(),
		}
	}
}

/// Scripted native runtime.
#[derive(Debug, Default)]
pub struct SimWorld {
	handles: AtomicU64,
	state: Mutex<WorldState>,
}

impl SimWorld {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn allocate(&self, object: SimObject, session: SessionHandle) -> u64 {
		let handle = self.handles.fetch_add(1, Ordering::Relaxed) + 1;
		self.state.lock().live.insert(handle, (object, session));
		trace!(handle, ?object, %session, "sim.allocate");
		handle
	}

	fn release(&self, handle: u64) {
		let mut state = self.state.lock();
		match state.live.remove(&handle) {
			Some((SimObject::Swapchain, _)) => state.destroyed_swapchains.push(handle),
			Some((SimObject::Anchor, _)) => {
				state.anchor_poses.remove(&handle);
			}
			Some((SimObject::Tracker(_), _)) => state.rays.retain(|_, (tracker, _)| *tracker != handle),
			_ => {}
		}
	}

	fn is_live(&self, handle: u64, object: SimObject) -> bool {
		self.state.lock().live.get(&handle).is_some_and(|(o, _)| *o == object)
	}

	fn create_tracker(&self, feature: FeatureKind, session: SessionHandle) -> Result<u64, NativeError> {
		if session.is_null() {
			return Err(NativeError::InvalidHandle);
		}
		if self.state.lock().rejected.contains(&feature) {
			return Err(NativeError::Code(-2));
		}
		Ok(self.allocate(SimObject::Tracker(feature), session))
	}

	fn poll_with<T>(&self, tracker: u64, f: impl FnOnce(&WorldState) -> T) -> Result<T, NativeError> {
		let mut state = self.state.lock();
		if !matches!(state.live.get(&tracker), Some((SimObject::Tracker(_), _))) {
			return Err(NativeError::InvalidHandle);
		}
		if state.failing_polls > 0 {
			state.failing_polls -= 1;
			return Err(NativeError::Code(-1));
		}
		Ok(f(&state))
	}

	pub fn set_planes(&self, planes: Vec<RawEntity<PlanePayload>>) {
		self.state.lock().planes = planes;
	}

	pub fn set_images(&self, images: Vec<RawEntity<ImagePayload>>) {
		self.state.lock().images = images;
	}

	pub fn set_markers(&self, markers: Vec<RawEntity<MarkerPayload>>) {
		self.state.lock().markers = markers;
	}

	/// Makes the next `count` tracker polls fail.
	pub fn fail_next_polls(&self, count: u32) {
		self.state.lock().failing_polls = count;
	}

	/// Makes tracker creation for `feature` fail while `rejected` is set.
	pub fn reject_trackers(&self, feature: FeatureKind, rejected: bool) {
		let mut state = self.state.lock();
		if rejected {
			state.rejected.insert(feature);
		} else {
			state.rejected.remove(&feature);
		}
	}

	/// Validity reported for every anchor location.
	pub fn set_anchor_flags(&self, flags: LocationFlags) {
		self.state.lock().anchor_flags = flags;
	}

	/// Makes the next `count` persist calls report insufficient map quality.
	pub fn set_low_quality(&self, count: u32) {
		self.state.lock().low_quality = count;
	}

	/// Time every store call blocks for.
	pub fn set_store_latency(&self, latency: Duration) {
		self.state.lock().store_latency = latency;
	}

	pub fn set_capabilities(&self, capabilities: LayerCapabilities) {
		self.state.lock().capabilities = capabilities;
	}

	/// Number of live objects of `object` kind.
	pub fn live(&self, object: SimObject) -> usize {
		self.state.lock().live.values().filter(|(o, _)| *o == object).count()
	}

	/// Swapchains destroyed so far, in destruction order.
	pub fn destroyed_swapchains(&self) -> Vec<u64> {
		self.state.lock().destroyed_swapchains.clone()
	}

	/// Names currently in the anchor store.
	pub fn stored_names(&self) -> Vec<String> {
		self.state.lock().store.keys().cloned().collect()
	}

	fn store_call(&self, conn: StoreConnection) -> Result<(), PersistFailure> {
		let latency = self.state.lock().store_latency;
		if !latency.is_zero() {
			std::thread::sleep(latency);
		}
		if !self.is_live(conn.0, SimObject::Store) {
			return Err(PersistFailure::StoreUnavailable);
		}
		Ok(())
	}
}

/// Tracker binding over a shared [`SimWorld`] for payload kind `P`.
#[derive(Debug)]
pub struct SimTracker<P> {
	world: Arc<SimWorld>,
	_payload: PhantomData<fn() -> P>,
}

impl<P> SimTracker<P> {
	pub fn new(world: &Arc<SimWorld>) -> Arc<Self> {
		Arc::new(Self {
			world: Arc::clone(world),
			_payload: PhantomData,
		})
	}
}

macro_rules! sim_tracker {
	($payload:ty, $config:ty, $field:ident) => {
		impl ResourceBinding for SimTracker<$payload> {
			type Native = u64;
			type Config = $config;

			fn create(&self, session: SessionHandle, _config: &$config) -> Result<u64, NativeError> {
				self.world.create_tracker(<$payload as TrackablePayload>::FEATURE, session)
			}

			fn destroy(&self, native: &u64) {
				self.world.release(*native);
			}
		}

		impl TrackerBinding for SimTracker<$payload> {
			type Payload = $payload;

			fn poll(&self, tracker: &u64, _frame: &FrameContext) -> Result<Vec<RawEntity<$payload>>, NativeError> {
				self.world.poll_with(*tracker, |state| state.$field.clone())
			}
		}
	};
}

sim_tracker!(PlanePayload, PlaneDetectorConfig, planes);
sim_tracker!(ImagePayload, ImageLibrary, images);
sim_tracker!(MarkerPayload, MarkerTrackerConfig, markers);

impl ResourceBinding for SimTracker<RaycastPayload> {
	type Native = u64;
	type Config = RaycastConfig;

	fn create(&self, session: SessionHandle, _config: &RaycastConfig) -> Result<u64, NativeError> {
		self.world.create_tracker(FeatureKind::Raycast, session)
	}

	fn destroy(&self, native: &u64) {
		self.world.release(*native);
	}
}

/// Intersects `ray` with the floor plane `y = 0`.
fn floor_hit(ray: Ray) -> Option<(f32, [f32; 3])> {
	let [ox, oy, oz] = ray.origin;
	let [dx, dy, dz] = ray.direction;
	if dy >= 0.0 || oy <= 0.0 {
		return None;
	}
	let t = oy / -dy;
	Some((t, [ox + t * dx, 0.0, oz + t * dz]))
}

impl TrackerBinding for SimTracker<RaycastPayload> {
	type Payload = RaycastPayload;

	fn poll(&self, tracker: &u64, _frame: &FrameContext) -> Result<Vec<RawEntity<RaycastPayload>>, NativeError> {
		self.world.poll_with(*tracker, |state| {
			state
				.rays
				.iter()
				.filter(|(_, (owner, _))| owner == tracker)
				.map(|(instance, (_, ray))| match floor_hit(*ray) {
					Some((distance, point)) => RawEntity {
						instance: *instance,
						location: Location::tracking(Pose::at(point)),
						payload: RaycastPayload {
							ray: *ray,
							target: RaycastTarget::Plane,
							distance,
						},
					},
					None => RawEntity {
						instance: *instance,
						location: Location::Failed,
						payload: RaycastPayload {
							ray: *ray,
							target: RaycastTarget::None,
							distance: 0.0,
						},
					},
				})
				.collect()
		})
	}
}

impl RaycastBinding for SimTracker<RaycastPayload> {
	fn add_ray(&self, tracker: &u64, ray: Ray) -> Result<u64, NativeError> {
		if !self.world.is_live(*tracker, SimObject::Tracker(FeatureKind::Raycast)) {
			return Err(NativeError::InvalidHandle);
		}
		let instance = self.world.handles.fetch_add(1, Ordering::Relaxed) + 1;
		self.world.state.lock().rays.insert(instance, (*tracker, ray));
		Ok(instance)
	}

	fn remove_ray(&self, _tracker: &u64, instance: u64) {
		self.world.state.lock().rays.remove(&instance);
	}
}

impl SpaceLocator for SimWorld {
	type Space = AnchorNative;

	fn locate(&self, space: AnchorNative, _base: SpaceHandle, _time: i64) -> Result<(Pose, LocationFlags), NativeError> {
		let state = self.state.lock();
		let pose = state.anchor_poses.get(&space.0).ok_or(NativeError::InvalidHandle)?;
		Ok((*pose, state.anchor_flags))
	}
}

impl AnchorRuntime for SimWorld {
	fn connect(&self, session: SessionHandle) -> Result<StoreConnection, NativeError> {
		if session.is_null() {
			return Err(NativeError::InvalidHandle);
		}
		if self.state.lock().rejected.contains(&FeatureKind::SpatialAnchor) {
			return Err(NativeError::Code(-2));
		}
		Ok(StoreConnection(self.allocate(SimObject::Store, session)))
	}

	fn disconnect(&self, conn: StoreConnection) {
		self.release(conn.0);
	}

	fn create_anchor(&self, frame: &FrameContext, pose: Pose) -> Result<AnchorNative, NativeError> {
		if frame.snapshot.session.is_null() {
			return Err(NativeError::SessionLost);
		}
		let handle = self.allocate(SimObject::Anchor, frame.snapshot.session);
		self.state.lock().anchor_poses.insert(handle, pose);
		Ok(AnchorNative(handle))
	}

	fn destroy_anchor(&self, anchor: AnchorNative) {
		self.release(anchor.0);
	}
}

impl PersistentStore for SimWorld {
	fn persist(&self, conn: StoreConnection, anchor: AnchorNative, name: &str) -> Result<(), PersistFailure> {
		self.store_call(conn)?;
		let mut state = self.state.lock();
		if state.low_quality > 0 {
			state.low_quality -= 1;
			return Err(PersistFailure::InsufficientQuality);
		}
		let pose = *state.anchor_poses.get(&anchor.0).ok_or(PersistFailure::UnknownAnchor)?;
		state.store.insert(name.to_string(), pose);
		Ok(())
	}

	fn restore(&self, conn: StoreConnection, session: SessionHandle, name: &str) -> Result<AnchorNative, PersistFailure> {
		self.store_call(conn)?;
		let pose = *self
			.state
			.lock()
			.store
			.get(name)
			.ok_or_else(|| PersistFailure::NotFound(name.to_string()))?;
		let handle = self.allocate(SimObject::Anchor, session);
		self.state.lock().anchor_poses.insert(handle, pose);
		Ok(AnchorNative(handle))
	}

	fn unpersist(&self, conn: StoreConnection, name: &str) -> Result<(), PersistFailure> {
		self.store_call(conn)?;
		match self.state.lock().store.remove(name) {
			Some(_) => Ok(()),
			None => Err(PersistFailure::NotFound(name.to_string())),
		}
	}

	fn clear(&self, conn: StoreConnection) -> Result<(), PersistFailure> {
		self.store_call(conn)?;
		self.state.lock().store.clear();
		Ok(())
	}

	fn enumerate(&self, conn: StoreConnection) -> Result<Vec<String>, PersistFailure> {
		self.store_call(conn)?;
		Ok(self.stored_names())
	}
}

impl LayerRuntime for SimWorld {
	fn capabilities(&self) -> LayerCapabilities {
		self.state.lock().capabilities
	}

	fn create_layer(&self, session: SessionHandle, _desc: &LayerDesc) -> Result<u64, NativeError> {
		if self.state.lock().rejected.contains(&FeatureKind::CompositionLayer) {
			return Err(NativeError::Code(-2));
		}
		Ok(self.allocate(SimObject::Layer, session))
	}

	fn destroy_layer(&self, layer: u64) {
		self.release(layer);
	}

	fn create_swapchain(&self, session: SessionHandle, _desc: &SwapchainDesc) -> Result<u64, NativeError> {
		Ok(self.allocate(SimObject::Swapchain, session))
	}

	fn destroy_swapchain(&self, swapchain: u64) {
		self.release(swapchain);
	}
}

/// Host-side driver that feeds lifecycle events like a runtime would.
#[derive(Debug)]
pub struct SimSession {
	lifecycle: Arc<SessionLifecycle>,
	next: u64,
}

impl SimSession {
	/// Builds a registry, gate and lifecycle with `features` registered,
	/// enabled and initialized.
	pub fn with_features(features: &[FeatureKind]) -> Self {
		let registry = Arc::new(HandleRegistry::new());
		let gate = Arc::new(FeatureGate::new(Arc::clone(&registry)));
		for feature in features {
			gate.register(*feature, true);
			gate.set_init(*feature, InitStatus::Ready);
		}
		Self {
			lifecycle: Arc::new(SessionLifecycle::new(registry, gate)),
			next: 0,
		}
	}

	pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
		&self.lifecycle
	}

	/// Creates the instance if needed, then a new session brought up to
	/// `Focused`.
	pub fn start(&mut self) -> SessionHandle {
		self.next += 1;
		self.start_as(SessionHandle::from_raw(0x2000 + self.next))
	}

	/// Like [`Self::start`], but under a handle value the runtime chose,
	/// possibly one it handed out before.
	pub fn start_as(&mut self, session: SessionHandle) -> SessionHandle {
		if self.lifecycle.registry().instance().is_null() {
			self.lifecycle.handle(SessionEvent::InstanceCreated(InstanceHandle::from_raw(0x1000)));
		}
		self.lifecycle.handle(SessionEvent::SessionCreated {
			session,
			space: SpaceHandle::from_raw(0x3000 + self.next),
		});
		use SessionState::*;
		for state in [Idle, Ready, Synchronized, Visible, Focused] {
			self.set_state(state);
		}
		session
	}

	/// Reports a transition from the current state to `new`.
	pub fn set_state(&self, new: SessionState) -> Transition {
		let old = self.lifecycle.state();
		self.lifecycle.handle(SessionEvent::SessionStateChanged { old, new })
	}

	/// Reports session loss.
	pub fn lose(&self) -> Transition {
		self.set_state(SessionState::LossPending)
	}

	/// Destroys the current session.
	pub fn destroy(&self) -> Transition {
		self.lifecycle.handle(SessionEvent::SessionDestroyed)
	}

	/// Orderly shutdown: `Stopping`, `Exiting`, then destroy.
	pub fn end(&self) -> Transition {
		self.set_state(SessionState::Stopping);
		self.set_state(SessionState::Exiting);
		self.destroy()
	}

	/// Replaces the reference space.
	pub fn recenter(&self) -> Transition {
		let space = SpaceHandle::from_raw(self.lifecycle.registry().space().raw() + 0x100);
		self.lifecycle.handle(SessionEvent::SpaceChanged(space))
	}

	/// Frame context at `time`.
	pub fn frame(&self, time: i64) -> FrameContext {
		FrameContext::capture(self.lifecycle.registry(), time)
	}
}
