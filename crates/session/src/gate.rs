//! Feature availability gate.
//!
//! # Purpose
//!
//! Answer "may this feature do work right now?" once per feature per epoch,
//! so per-frame checks are a map lookup and persistent unavailability does not
//! flood the log.
//!
//! # Evaluation order
//!
//! 1. Feature registered and enabled.
//! 2. Feature initialized successfully.
//! 3. Runtime instance present.
//! 4. Session present and not being lost.
//! 5. Session state is running.
//!
//! # Caching
//!
//! Verdicts are cached until [`FeatureGate::invalidate`] bumps the epoch. The
//! session lifecycle invalidates on every state or handle change. Only the
//! first failing evaluation in an epoch is logged at `warn`; every failure is
//! still recorded and available through [`FeatureGate::diagnostic`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tessera_primitives::FeatureKind;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{HandleRegistry, SessionState};

/// Initialization outcome of a feature's native support.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InitStatus {
	/// Not initialized yet.
	#[default]
	Pending,
	/// Initialized and usable.
	Ready,
	/// Initialization failed.
	Failed(String),
}

/// Why a feature is not usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unavailable {
	#[error("feature is not registered")]
	NotRegistered,
	#[error("feature is disabled")]
	Disabled,
	#[error("feature is not initialized")]
	InitPending,
	#[error("feature failed to initialize: {0}")]
	InitFailed(String),
	#[error("no runtime instance")]
	NoRuntime,
	#[error("no active session")]
	NoSession,
	#[error("session is being lost")]
	SessionLost,
	#[error("session not running (state {0:?})")]
	NotRunning(SessionState),
}

#[derive(Debug, Clone)]
struct FeatureEntry {
	enabled: bool,
	init: InitStatus,
}

#[derive(Debug, Default)]
struct GateCache {
	epoch: u64,
	usable: FxHashMap<FeatureKind, bool>,
	enabled: FxHashMap<FeatureKind, bool>,
	diagnostics: FxHashMap<FeatureKind, Unavailable>,
	explained: bool,
}

/// Cached per-feature usability check shared by every feature.
#[derive(Debug)]
pub struct FeatureGate {
	registry: Arc<HandleRegistry>,
	features: RwLock<FxHashMap<FeatureKind, FeatureEntry>>,
	cache: Mutex<GateCache>,
	explanations: AtomicU64,
}

impl FeatureGate {
	/// Creates a gate with no registered features.
	pub fn new(registry: Arc<HandleRegistry>) -> Self {
		Self {
			registry,
			features: RwLock::new(FxHashMap::default()),
			cache: Mutex::new(GateCache::default()),
			explanations: AtomicU64::new(0),
		}
	}

	/// Registers `feature` with its enabled flag. Initialization starts pending.
	pub fn register(&self, feature: FeatureKind, enabled: bool) {
		self.features.write().insert(
			feature,
			FeatureEntry {
				enabled,
				init: InitStatus::Pending,
			},
		);
		self.invalidate();
	}

	/// Records the initialization outcome of a registered feature.
	pub fn set_init(&self, feature: FeatureKind, init: InitStatus) {
		if let Some(entry) = self.features.write().get_mut(&feature) {
			entry.init = init;
		}
		self.invalidate();
	}

	/// Enables or disables a registered feature.
	pub fn set_enabled(&self, feature: FeatureKind, enabled: bool) {
		if let Some(entry) = self.features.write().get_mut(&feature) {
			entry.enabled = enabled;
		}
		self.invalidate();
	}

	/// Drops every cached verdict and starts a new epoch.
	pub fn invalidate(&self) {
		let mut cache = self.cache.lock();
		let epoch = cache.epoch + 1;
		*cache = GateCache {
			epoch,
			..GateCache::default()
		};
		debug!(epoch, "gate.invalidate");
	}

	/// Current cache epoch.
	pub fn epoch(&self) -> u64 {
		self.cache.lock().epoch
	}

	/// Number of detailed failure explanations logged so far.
	pub fn explanations_logged(&self) -> u64 {
		self.explanations.load(Ordering::Relaxed)
	}

	/// Returns true when the feature is registered and enabled.
	pub fn is_enabled(&self, feature: FeatureKind) -> bool {
		let epoch = {
			let cache = self.cache.lock();
			if let Some(&cached) = cache.enabled.get(&feature) {
				return cached;
			}
			cache.epoch
		};
		let verdict = self.features.read().get(&feature).is_some_and(|e| e.enabled);
		let mut cache = self.cache.lock();
		if cache.epoch == epoch {
			cache.enabled.insert(feature, verdict);
		}
		verdict
	}

	/// Returns true when the feature may do work this frame.
	///
	/// `false` covers every failure alike; see [`Self::diagnostic`] for why.
	pub fn is_usable(&self, feature: FeatureKind) -> bool {
		let epoch = {
			let cache = self.cache.lock();
			if let Some(&cached) = cache.usable.get(&feature) {
				return cached;
			}
			cache.epoch
		};

		let verdict = self.evaluate(feature);
		let mut cache = self.cache.lock();
		if cache.epoch != epoch {
			// Invalidated mid-evaluation; report without caching.
			return verdict.is_ok();
		}
		match verdict {
			Ok(()) => {
				cache.usable.insert(feature, true);
				cache.diagnostics.remove(&feature);
				true
			}
			Err(reason) => {
				if !cache.explained {
					cache.explained = true;
					self.explanations.fetch_add(1, Ordering::Relaxed);
					warn!(feature = %feature, reason = %reason, "gate.unusable");
				}
				cache.usable.insert(feature, false);
				cache.diagnostics.insert(feature, reason);
				false
			}
		}
	}

	/// Reason recorded for the last failing verdict of `feature` in this epoch.
	pub fn diagnostic(&self, feature: FeatureKind) -> Option<Unavailable> {
		self.cache.lock().diagnostics.get(&feature).cloned()
	}

	fn evaluate(&self, feature: FeatureKind) -> Result<(), Unavailable> {
		{
			let features = self.features.read();
			let entry = features.get(&feature).ok_or(Unavailable::NotRegistered)?;
			if !entry.enabled {
				return Err(Unavailable::Disabled);
			}
			match &entry.init {
				InitStatus::Ready => {}
				InitStatus::Pending => return Err(Unavailable::InitPending),
				InitStatus::Failed(msg) => return Err(Unavailable::InitFailed(msg.clone())),
			}
		}

		let snap = self.registry.snapshot();
		if snap.instance.is_null() {
			return Err(Unavailable::NoRuntime);
		}
		if snap.session.is_null() {
			return Err(Unavailable::NoSession);
		}
		match snap.state {
			SessionState::LossPending => Err(Unavailable::SessionLost),
			state if !state.is_running() => Err(Unavailable::NotRunning(state)),
			_ => Ok(()),
		}
	}
}
