//! Composition layers and their swapchains.
//!
//! # Ownership
//!
//! A layer record owns one swapchain record. Swapchains are render-thread
//! resources: when the session is lost, the loss listener hands every
//! swapchain of that session to the render thread through the
//! [`TeardownScheduler`] before the frame thread notices. The frame thread
//! later reaps the stale layer records; swapchains already handed over are
//! not destroyed a second time.
//!
//! # Session changes
//!
//! Layers do not survive a session. [`CompositionLayers::update`] reports a
//! stale layer as [`LayerEvent::Lost`] and, once a running session exists,
//! recreates it from its description under a new id
//! ([`LayerEvent::Recreated`]). Callers must re-resolve ids from events.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_primitives::{FeatureKind, ListenerToken, Pose, ResourceId, SessionHandle};
use tessera_session::{Listeners, SessionLifecycle, SessionListener, TeardownScheduler};
use tracing::{debug, info};

use crate::binding::ResourceBinding;
use crate::error::{NativeError, ResourceError, Result, TrackingError};
use crate::resource::{LossMarks, ResourceManager};
use crate::subsystem::FrameContext;

/// Runtime limits for composition layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerCapabilities {
	pub max_layers: u32,
	pub max_width: u32,
	pub max_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerShape {
	Quad { size: [f32; 2] },
	Cylinder { radius: f32, central_angle: f32, aspect_ratio: f32 },
	Equirect { radius: f32 },
}

/// Description of one composition layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerDesc {
	pub shape: LayerShape,
	pub pose: Pose,
	/// Swapchain image size in pixels.
	pub width: u32,
	pub height: u32,
	/// Composition order; higher draws later.
	pub sort_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
	pub width: u32,
	pub height: u32,
	pub sample_count: u32,
}

/// Native compositor support.
pub trait LayerRuntime: Send + Sync + 'static {
	fn capabilities(&self) -> LayerCapabilities;
	fn create_layer(&self, session: SessionHandle, desc: &LayerDesc) -> std::result::Result<u64, NativeError>;
	fn destroy_layer(&self, layer: u64);
	fn create_swapchain(&self, session: SessionHandle, desc: &SwapchainDesc) -> std::result::Result<u64, NativeError>;
	/// Must run on the render thread.
	fn destroy_swapchain(&self, swapchain: u64);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompositorResource {
	Layer(LayerDesc),
	Swapchain(SwapchainDesc),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorNative {
	Layer(u64),
	Swapchain(u64),
}

/// Swapchains not yet handed to the render thread, by owning session.
#[derive(Debug, Default)]
struct SwapchainLedger {
	owners: Mutex<FxHashMap<u64, SessionHandle>>,
}

impl SwapchainLedger {
	fn take(&self, swapchain: u64) -> bool {
		self.owners.lock().remove(&swapchain).is_some()
	}

	fn take_session(&self, session: SessionHandle) -> Vec<u64> {
		let mut owners = self.owners.lock();
		let taken: Vec<u64> = owners.iter().filter(|(_, s)| **s == session).map(|(c, _)| *c).collect();
		for swapchain in &taken {
			owners.remove(swapchain);
		}
		taken
	}
}

/// [`ResourceBinding`] over a [`LayerRuntime`] for layers and swapchains.
#[derive(Debug)]
pub struct CompositorBinding<R> {
	runtime: Arc<R>,
	ledger: Arc<SwapchainLedger>,
}

impl<R: LayerRuntime> ResourceBinding for CompositorBinding<R> {
	type Native = CompositorNative;
	type Config = CompositorResource;

	fn create(&self, session: SessionHandle, config: &CompositorResource) -> std::result::Result<CompositorNative, NativeError> {
		match config {
			CompositorResource::Layer(desc) => self.runtime.create_layer(session, desc).map(CompositorNative::Layer),
			CompositorResource::Swapchain(desc) => {
				let swapchain = self.runtime.create_swapchain(session, desc)?;
				self.ledger.owners.lock().insert(swapchain, session);
				Ok(CompositorNative::Swapchain(swapchain))
			}
		}
	}

	fn destroy(&self, native: &CompositorNative) {
		match *native {
			CompositorNative::Layer(layer) => self.runtime.destroy_layer(layer),
			CompositorNative::Swapchain(swapchain) => {
				if self.ledger.take(swapchain) {
					self.runtime.destroy_swapchain(swapchain);
				}
			}
		}
	}
}

struct LayerLossListener<R> {
	runtime: Arc<R>,
	ledger: Arc<SwapchainLedger>,
	marks: Arc<LossMarks>,
}

impl<R: LayerRuntime> SessionListener for LayerLossListener<R> {
	fn on_session_created(&self, session: SessionHandle) {
		self.marks.begin(session);
	}

	fn on_session_lost(&self, session: SessionHandle, teardown: &TeardownScheduler) {
		self.marks.mark(session);
		let swapchains = self.ledger.take_session(session);
		if swapchains.is_empty() {
			return;
		}
		debug!(%session, count = swapchains.len(), "layer.swapchain_teardown_scheduled");
		let runtime = Arc::clone(&self.runtime);
		teardown.schedule(session, "swapchain", move || {
			for swapchain in swapchains {
				runtime.destroy_swapchain(swapchain);
			}
		});
	}

	fn on_session_destroyed(&self, session: SessionHandle) {
		self.marks.mark(session);
	}
}

/// Change to the set of layers, delivered to [`LayerListener`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEvent {
	Created(ResourceId),
	Destroyed(ResourceId),
	/// The owning session went away; the layer awaits recreation.
	Lost(ResourceId),
	Recreated { old: ResourceId, new: ResourceId },
}

pub trait LayerListener: Send + Sync {
	fn on_layer_event(&self, event: &LayerEvent);
}

/// Composition layer manager.
pub struct CompositionLayers<R: LayerRuntime> {
	runtime: Arc<R>,
	lifecycle: Arc<SessionLifecycle>,
	manager: ResourceManager<CompositorBinding<R>>,
	listeners: Listeners<dyn LayerListener>,
	layers: Vec<ResourceId>,
	orphans: Vec<(ResourceId, LayerDesc)>,
	token: ListenerToken,
}

impl<R: LayerRuntime> std::fmt::Debug for CompositionLayers<R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CompositionLayers")
			.field("layers", &self.layers)
			.field("orphans", &self.orphans.len())
			.field("listeners", &self.listeners)
			.finish_non_exhaustive()
	}
}

impl<R: LayerRuntime> CompositionLayers<R> {
	pub fn new(runtime: Arc<R>, lifecycle: Arc<SessionLifecycle>) -> Self {
		let ledger = Arc::new(SwapchainLedger::default());
		let marks = Arc::new(LossMarks::new());
		let token = ListenerToken::unique();
		let listener = LayerLossListener {
			runtime: Arc::clone(&runtime),
			ledger: Arc::clone(&ledger),
			marks: Arc::clone(&marks),
		};
		lifecycle.subscribe(token, Arc::new(listener));
		let binding = CompositorBinding {
			runtime: Arc::clone(&runtime),
			ledger,
		};
		Self {
			runtime,
			lifecycle,
			manager: ResourceManager::new("layer", Arc::new(binding), marks),
			listeners: Listeners::new(),
			layers: Vec::new(),
			orphans: Vec::new(),
			token,
		}
	}

	/// Adds or replaces the layer listener keyed by `token`.
	pub fn subscribe(&self, token: ListenerToken, listener: Arc<dyn LayerListener>) -> bool {
		self.listeners.subscribe(token, listener)
	}

	pub fn unsubscribe(&self, token: ListenerToken) -> bool {
		self.listeners.unsubscribe(token)
	}

	pub fn capabilities(&self) -> LayerCapabilities {
		self.runtime.capabilities()
	}

	/// Live layers in creation order.
	pub fn layers(&self) -> &[ResourceId] {
		&self.layers
	}

	pub fn desc(&self, layer: ResourceId) -> Option<&LayerDesc> {
		match self.manager.get(layer).map(|r| &r.config) {
			Some(CompositorResource::Layer(desc)) => Some(desc),
			_ => None,
		}
	}

	/// Native swapchain owned by `layer`.
	pub fn swapchain(&self, layer: ResourceId) -> Option<u64> {
		self.manager.ids().into_iter().find_map(|id| {
			let record = self.manager.get(id)?;
			match record.native {
				CompositorNative::Swapchain(swapchain) if record.parent == Some(layer) => Some(swapchain),
				_ => None,
			}
		})
	}

	/// Creates a layer and its swapchain in the current session.
	pub fn create_layer(&mut self, desc: LayerDesc) -> Result<ResourceId> {
		let feature = FeatureKind::CompositionLayer;
		let gate = self.lifecycle.gate();
		if !gate.is_usable(feature) {
			return Err(TrackingError::Unavailable {
				feature,
				reason: gate.diagnostic(feature),
			});
		}
		let session = self.lifecycle.registry().snapshot().require_running()?;
		let id = self.instantiate(session, &desc)?;
		self.emit(LayerEvent::Created(id));
		Ok(id)
	}

	/// Destroys a layer, its swapchain first.
	pub fn destroy_layer(&mut self, layer: ResourceId) -> Result<()> {
		let Some(pos) = self.layers.iter().position(|l| *l == layer) else {
			return Err(ResourceError::Stale(layer).into());
		};
		self.layers.remove(pos);
		self.manager.destroy(layer);
		info!(%layer, "layer.destroyed");
		self.emit(LayerEvent::Destroyed(layer));
		Ok(())
	}

	/// Reaps layers of a lost session and recreates them once a running
	/// session exists. Returns the events also sent to listeners.
	pub fn update(&mut self, frame: &FrameContext) -> Vec<LayerEvent> {
		let mut events = Vec::new();
		for (id, config) in self.manager.reap_stale(frame.snapshot.session) {
			if let CompositorResource::Layer(desc) = config {
				self.layers.retain(|l| *l != id);
				self.orphans.push((id, desc));
				events.push(LayerEvent::Lost(id));
			}
		}

		if !self.orphans.is_empty()
			&& let Ok(session) = frame.snapshot.require_running()
			&& self.lifecycle.gate().is_usable(FeatureKind::CompositionLayer)
		{
			for (old, desc) in std::mem::take(&mut self.orphans) {
				match self.instantiate(session, &desc) {
					Ok(new) => {
						info!(%old, %new, %session, "layer.recreated");
						events.push(LayerEvent::Recreated { old, new });
					}
					Err(e) => {
						debug!(%old, error = %e, "layer.recreate_deferred");
						self.orphans.push((old, desc));
					}
				}
			}
		}

		for event in &events {
			self.emit(*event);
		}
		events
	}

	fn instantiate(&mut self, session: SessionHandle, desc: &LayerDesc) -> std::result::Result<ResourceId, ResourceError> {
		let caps = self.runtime.capabilities();
		let count = u32::try_from(self.layers.len()).unwrap_or(u32::MAX).saturating_add(1);
		for (what, requested, max) in [
			("layer count", count, caps.max_layers),
			("width", desc.width, caps.max_width),
			("height", desc.height, caps.max_height),
		] {
			if requested > max {
				return Err(ResourceError::CapabilityExceeded { what, requested, max });
			}
		}
		if desc.width == 0 || desc.height == 0 {
			return Err(ResourceError::InvalidConfig(format!("layer size {}x{}", desc.width, desc.height)));
		}

		let layer = self.manager.create(session, &CompositorResource::Layer(*desc), None)?;
		let swapchain = SwapchainDesc {
			width: desc.width,
			height: desc.height,
			sample_count: 1,
		};
		if let Err(e) = self.manager.create(session, &CompositorResource::Swapchain(swapchain), Some(layer)) {
			self.manager.destroy(layer);
			return Err(e);
		}
		self.layers.push(layer);
		Ok(layer)
	}

	fn emit(&self, event: LayerEvent) {
		self.listeners.for_each(|l| l.on_layer_event(&event));
	}
}

impl<R: LayerRuntime> Drop for CompositionLayers<R> {
	fn drop(&mut self) {
		self.lifecycle.unsubscribe(self.token);
	}
}
