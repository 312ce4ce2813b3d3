//! Persistent raycasts.
//!
//! Each raycast the caller adds becomes one trackable whose pose is the
//! current hit. Rays without a hit this frame are located as failed, so they
//! keep their last pose with tracking dropped.

use std::sync::Arc;

use tessera_primitives::{FeatureKind, TrackableId};
use tessera_session::SessionLifecycle;
use tracing::debug;

use crate::binding::{TrackablePayload, TrackerBinding, TrackerConfig};
use crate::error::{NativeError, Result, TrackingError};
use crate::reducer::ChangeSet;
use crate::subsystem::{FrameContext, TrackableSubsystem};

/// Ray in reference-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
	pub origin: [f32; 3],
	/// Unit direction.
	pub direction: [f32; 3],
}

/// Kind of geometry a raycast hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaycastTarget {
	None,
	Plane,
	Depth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastPayload {
	pub ray: Ray,
	pub target: RaycastTarget,
	/// Distance from the ray origin to the hit, in meters.
	pub distance: f32,
}

impl TrackablePayload for RaycastPayload {
	const FEATURE: FeatureKind = FeatureKind::Raycast;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RaycastConfig {
	/// Hits beyond this distance are not reported; 0 disables the cap.
	pub max_distance: f32,
}

impl TrackerConfig<RaycastPayload> for RaycastConfig {
	fn accepts(&self, payload: &RaycastPayload) -> bool {
		self.max_distance <= 0.0 || payload.target == RaycastTarget::None || payload.distance <= self.max_distance
	}
}

/// Native raycast tracker that also accepts per-ray requests.
pub trait RaycastBinding: TrackerBinding<Payload = RaycastPayload, Config = RaycastConfig> {
	/// Registers `ray` and returns its instance id.
	fn add_ray(&self, tracker: &Self::Native, ray: Ray) -> std::result::Result<u64, NativeError>;

	/// Unregisters a ray. Unknown instances are ignored.
	fn remove_ray(&self, tracker: &Self::Native, instance: u64);
}

/// Raycast subsystem with add and remove operations.
#[derive(Debug)]
pub struct Raycasts<B: RaycastBinding> {
	inner: TrackableSubsystem<B>,
}

impl<B: RaycastBinding> Raycasts<B> {
	pub fn new(binding: Arc<B>, lifecycle: Arc<SessionLifecycle>, config: RaycastConfig) -> Self {
		Self {
			inner: TrackableSubsystem::new(binding, lifecycle, config),
		}
	}

	pub fn subsystem(&self) -> &TrackableSubsystem<B> {
		&self.inner
	}

	/// Adds a ray. The tracker must be running; hits appear from the next
	/// update on.
	pub fn add(&mut self, ray: Ray) -> Result<TrackableId> {
		let tracker = self.inner.tracker_id().ok_or(TrackingError::NotRunning(FeatureKind::Raycast))?;
		let native = self.inner.native().ok_or(TrackingError::NotRunning(FeatureKind::Raycast))?;
		let instance = self.inner.binding().add_ray(native, ray)?;
		let id = TrackableId::new(tracker, instance);
		debug!(%id, "raycast.added");
		Ok(id)
	}

	/// Removes a ray previously returned by [`Self::add`].
	pub fn remove(&mut self, id: TrackableId) -> Result<()> {
		if self.inner.tracker_id() != Some(id.tracker) {
			return Err(TrackingError::UnknownTrackable(id));
		}
		let native = self.inner.native().ok_or(TrackingError::NotRunning(FeatureKind::Raycast))?;
		self.inner.binding().remove_ray(native, id.instance);
		debug!(%id, "raycast.removed");
		Ok(())
	}

	pub fn update(&mut self, frame: &FrameContext) -> Result<ChangeSet<RaycastPayload>> {
		self.inner.update(frame)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tessera_primitives::{Pose, TrackingState};

	use super::*;
	use crate::sim::{SimSession, SimTracker, SimWorld};

	fn down_from(height: f32) -> Ray {
		Ray {
			origin: [1.0, height, 0.0],
			direction: [0.0, -1.0, 0.0],
		}
	}

	fn setup(config: RaycastConfig) -> (SimSession, Raycasts<SimTracker<RaycastPayload>>) {
		let world = SimWorld::new();
		let mut host = SimSession::with_features(&[FeatureKind::Raycast]);
		let mut raycasts = Raycasts::new(SimTracker::new(&world), Arc::clone(host.lifecycle()), config);
		host.start();
		raycasts.update(&host.frame(0)).unwrap();
		(host, raycasts)
	}

	#[test]
	fn add_requires_running_tracker() {
		let world = SimWorld::new();
		let host = SimSession::with_features(&[FeatureKind::Raycast]);
		let mut raycasts = Raycasts::new(SimTracker::new(&world), Arc::clone(host.lifecycle()), RaycastConfig::default());
		assert_eq!(raycasts.add(down_from(1.0)), Err(TrackingError::NotRunning(FeatureKind::Raycast)));
	}

	#[test]
	fn hits_are_tracked_until_removed() {
		let (host, mut raycasts) = setup(RaycastConfig::default());
		let hit = raycasts.add(down_from(2.0)).unwrap();
		let miss = raycasts
			.add(Ray {
				origin: [0.0, 1.0, 0.0],
				direction: [0.0, 1.0, 0.0],
			})
			.unwrap();

		let changes = raycasts.update(&host.frame(1)).unwrap();
		assert_eq!(changes.added.len(), 2);
		let found = raycasts.subsystem().get(hit).unwrap();
		assert_eq!(found.pose, Pose::at([1.0, 0.0, 0.0]));
		assert_eq!(found.payload.distance, 2.0);
		assert_eq!(raycasts.subsystem().get(miss).unwrap().tracking, TrackingState::None);

		raycasts.remove(hit).unwrap();
		assert_eq!(raycasts.update(&host.frame(2)).unwrap().removed, vec![hit]);
	}

	#[test]
	fn distant_hits_are_dropped() {
		let (host, mut raycasts) = setup(RaycastConfig { max_distance: 1.5 });
		let near = raycasts.add(down_from(1.0)).unwrap();
		raycasts.add(down_from(3.0)).unwrap();
		let changes = raycasts.update(&host.frame(1)).unwrap();
		assert_eq!(changes.added.iter().map(|r| r.id).collect::<Vec<_>>(), vec![near]);
	}
}
