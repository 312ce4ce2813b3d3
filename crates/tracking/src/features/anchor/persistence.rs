//! Blocking anchor store jobs run on persistence workers.
//!
//! Jobs carry the session incarnation they were issued for. A job whose
//! session is no longer current, or was lost, fails with
//! [`PersistFailure::SessionLost`] without touching the store. A save whose
//! anchor is still being created, or whose map quality is too low, asks the
//! worker to retry it later; if the retry bound runs out, the last of those
//! failures rides along in [`PersistFailure::RetryExhausted`].

use std::sync::Arc;

use tessera_primitives::SessionHandle;
use tessera_session::HandleRegistry;
use tessera_worker::{Abandon, JobHandler, JobOutcome};
use thiserror::Error;
use tracing::debug;

use crate::resource::LossMarks;

use super::{AnchorDirectory, AnchorNative, DirectoryLookup, StoreConnection};

/// Why a persistence request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistFailure {
	/// Mapping quality is too low to persist yet. Retried by the worker.
	#[error("insufficient mapping quality")]
	InsufficientQuality,
	#[error("anchor store unavailable")]
	StoreUnavailable,
	#[error("no persisted anchor named {0:?}")]
	NotFound(String),
	#[error("anchor is unknown")]
	UnknownAnchor,
	/// The anchor had not finished native creation. Retried by the worker.
	#[error("anchor is still being created")]
	AnchorPending,
	/// The precondition never became true within the retry bound. `last` is
	/// the retryable failure seen on the final attempt.
	#[error("gave up after {attempts} attempts{}", last_reason(.last))]
	RetryExhausted { attempts: u32, last: Option<Box<PersistFailure>> },
	#[error("session lost before the request completed")]
	SessionLost,
	/// The worker shut down with the request still queued.
	#[error("request cancelled")]
	Cancelled,
	#[error("native store error: {0}")]
	Native(String),
}

fn last_reason(last: &Option<Box<PersistFailure>>) -> String {
	last.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
}

impl PersistFailure {
	/// Returns true for failures a save is retried on.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::InsufficientQuality | Self::AnchorPending)
	}
}

/// Blocking native anchor store.
pub trait PersistentStore: Send + Sync + 'static {
	/// Persists `anchor` under `name`, replacing an existing entry.
	fn persist(&self, conn: StoreConnection, anchor: AnchorNative, name: &str) -> Result<(), PersistFailure>;

	/// Recreates the anchor persisted under `name` in `session`.
	fn restore(&self, conn: StoreConnection, session: SessionHandle, name: &str) -> Result<AnchorNative, PersistFailure>;

	fn unpersist(&self, conn: StoreConnection, name: &str) -> Result<(), PersistFailure>;

	fn clear(&self, conn: StoreConnection) -> Result<(), PersistFailure>;

	/// Names of every persisted anchor.
	fn enumerate(&self, conn: StoreConnection) -> Result<Vec<String>, PersistFailure>;
}

/// Store operation carried by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreOp {
	Save { instance: u64, name: String },
	Load { name: String },
	Erase { name: String },
	Clear,
	List,
}

impl StoreOp {
	pub(crate) fn label(&self) -> &'static str {
		match self {
			Self::Save { .. } => "save",
			Self::Load { .. } => "load",
			Self::Erase { .. } => "erase",
			Self::Clear => "clear",
			Self::List => "list",
		}
	}
}

#[derive(Debug)]
pub(crate) struct StoreJob {
	pub ticket: u64,
	pub session: SessionHandle,
	pub incarnation: u64,
	pub conn: StoreConnection,
	pub op: StoreOp,
	/// Retryable failure from the latest attempt.
	pub last_failure: Option<PersistFailure>,
}

/// Successful store reply, before the frame thread attaches identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreReply {
	Saved { instance: u64, name: String },
	Loaded { name: String, anchor: AnchorNative },
	Erased { name: String },
	Cleared,
	Listed(Vec<String>),
}

#[derive(Debug)]
pub(crate) struct StoreResult {
	pub ticket: u64,
	pub session: SessionHandle,
	pub incarnation: u64,
	pub outcome: Result<StoreReply, PersistFailure>,
}

/// Runs [`StoreJob`]s against a [`PersistentStore`].
pub(crate) struct StoreHandler<S> {
	store: Arc<S>,
	registry: Arc<HandleRegistry>,
	marks: Arc<LossMarks>,
	directory: Arc<AnchorDirectory>,
}

impl<S: PersistentStore> StoreHandler<S> {
	pub(crate) fn new(store: Arc<S>, registry: Arc<HandleRegistry>, marks: Arc<LossMarks>, directory: Arc<AnchorDirectory>) -> Self {
		Self {
			store,
			registry,
			marks,
			directory,
		}
	}

	fn execute(&self, job: &StoreJob) -> Result<StoreReply, PersistFailure> {
		if !self.registry.is_current(job.session) || self.marks.is_stale(job.session, job.incarnation) {
			return Err(PersistFailure::SessionLost);
		}
		match &job.op {
			StoreOp::Save { instance, name } => {
				let anchor = match self.directory.lookup(*instance) {
					DirectoryLookup::Missing => return Err(PersistFailure::UnknownAnchor),
					DirectoryLookup::Pending => return Err(PersistFailure::AnchorPending),
					DirectoryLookup::Ready(anchor) => anchor,
				};
				self.store.persist(job.conn, anchor, name).map(|()| StoreReply::Saved {
					instance: *instance,
					name: name.clone(),
				})
			}
			StoreOp::Load { name } => self
				.store
				.restore(job.conn, job.session, name)
				.map(|anchor| StoreReply::Loaded { name: name.clone(), anchor }),
			StoreOp::Erase { name } => self.store.unpersist(job.conn, name).map(|()| StoreReply::Erased { name: name.clone() }),
			StoreOp::Clear => self.store.clear(job.conn).map(|()| StoreReply::Cleared),
			StoreOp::List => self.store.enumerate(job.conn).map(StoreReply::Listed),
		}
	}
}

impl<S: PersistentStore> JobHandler for StoreHandler<S> {
	type Job = StoreJob;
	type Output = StoreResult;

	fn run(&mut self, job: &mut StoreJob) -> JobOutcome<StoreResult> {
		let outcome = match self.execute(job) {
			Err(e) if e.is_retryable() && matches!(job.op, StoreOp::Save { .. }) => {
				job.last_failure = Some(e);
				return JobOutcome::Retry;
			}
			outcome => outcome,
		};
		if let Err(e) = &outcome {
			debug!(ticket = job.ticket, op = job.op.label(), error = %e, "anchor.store_failed");
		}
		JobOutcome::Done(StoreResult {
			ticket: job.ticket,
			session: job.session,
			incarnation: job.incarnation,
			outcome,
		})
	}

	fn abandon(&mut self, job: StoreJob, reason: Abandon) -> StoreResult {
		let failure = match reason {
			Abandon::RetryExhausted { attempts } => PersistFailure::RetryExhausted {
				attempts,
				last: job.last_failure.map(Box::new),
			},
			Abandon::Shutdown => PersistFailure::Cancelled,
			Abandon::Panicked(msg) => PersistFailure::Native(msg),
		};
		StoreResult {
			ticket: job.ticket,
			session: job.session,
			incarnation: job.incarnation,
			outcome: Err(failure),
		}
	}
}
