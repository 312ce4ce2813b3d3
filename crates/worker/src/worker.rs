//! Long-lived blocking worker paired with a FIFO job queue and a result queue.
//!
//! # Mental model
//!
//! * Callers [`Worker::submit`] jobs from any thread; jobs land in a [`JobQueue`].
//! * One named OS thread pops jobs in FIFO order and runs exactly one blocking
//!   [`JobHandler::run`] call per job.
//! * Outputs are posted to an unbounded result queue that the frame thread
//!   drains with [`Worker::drain_results`]. Callbacks run there, never on the
//!   worker thread.
//!
//! # Lifecycle
//!
//! 1. The thread starts lazily on the first submit. A compare-and-swap on the
//!    `running` flag guarantees a single thread even when submits race.
//! 2. With [`WorkerSpec::idle_exit`] set, the thread retires after that much
//!    idle time and the next submit starts a new one. Retirement happens under
//!    the queue lock so a concurrent submit either wakes the old thread or
//!    starts a new one, never neither.
//! 3. [`Worker::shutdown`] cancels, closes the queue, joins the thread, and
//!    hands every still-queued job to [`JobHandler::abandon`].
//!
//! # Retry
//!
//! A handler returns [`JobOutcome::Retry`] when the job's precondition is not
//! met yet. The job goes to the back of the same queue until
//! [`RetryPolicy::max_attempts`] or [`RetryPolicy::ttl`] is exhausted, then it
//! is abandoned with [`Abandon::RetryExhausted`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::{JobQueue, Pop};
use crate::registry::WorkerRegistry;
use crate::spawn::panic_message;
use crate::{TaskClass, spawn_named_thread};

/// Outcome of one blocking job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<R> {
	/// Job finished; post the output.
	Done(R),
	/// Precondition not satisfied yet; re-enqueue at the back of the queue.
	Retry,
}

/// Why a job was dropped without a [`JobOutcome::Done`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abandon {
	/// Retry bound reached.
	RetryExhausted {
		/// Attempts made, including the last one.
		attempts: u32,
	},
	/// Worker shut down while the job was queued.
	Shutdown,
	/// The handler panicked.
	Panicked(String),
}

/// Blocking job executor run on the worker thread.
pub trait JobHandler: Send + 'static {
	/// Queued work item.
	type Job: Send + 'static;
	/// Output posted to the result queue.
	type Output: Send + 'static;

	/// Executes one job. May block.
	fn run(&mut self, job: &mut Self::Job) -> JobOutcome<Self::Output>;

	/// Converts a job that will not run to completion into an output.
	fn abandon(&mut self, job: Self::Job, reason: Abandon) -> Self::Output;
}

/// Bounds on re-enqueueing a job whose precondition is unmet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Maximum executions of one job.
	pub max_attempts: u32,
	/// Maximum time since first enqueue.
	pub ttl: Duration,
	/// Pause before re-running a retried job when nothing else is queued.
	pub backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 64,
			ttl: Duration::from_secs(10),
			backoff: Duration::from_millis(5),
		}
	}
}

impl RetryPolicy {
	fn exhausted(&self, attempts: u32, enqueued_at: Instant) -> bool {
		attempts >= self.max_attempts || enqueued_at.elapsed() >= self.ttl
	}
}

/// Static configuration of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
	pub name: String,
	pub class: TaskClass,
	pub retry: RetryPolicy,
	/// Retire the thread after this much idle time. `None` keeps it alive
	/// until shutdown.
	pub idle_exit: Option<Duration>,
}

impl WorkerSpec {
	/// Creates a spec with default retry policy and no idle exit.
	pub fn new(name: impl Into<String>, class: TaskClass) -> Self {
		Self {
			name: name.into(),
			class,
			retry: RetryPolicy::default(),
			idle_exit: None,
		}
	}

	/// Sets the retry policy.
	#[must_use]
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Sets the idle exit timeout.
	#[must_use]
	pub fn idle_exit(mut self, idle: Option<Duration>) -> Self {
		self.idle_exit = idle;
		self
	}
}

/// Submission failure.
#[derive(Debug)]
pub enum SubmitError {
	/// Worker was shut down.
	Closed,
	/// The worker thread could not be spawned.
	Spawn(std::io::Error),
}

impl std::fmt::Display for SubmitError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Closed => f.write_str("worker is shut down"),
			Self::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
		}
	}
}

impl std::error::Error for SubmitError {}

struct Pending<J> {
	job: J,
	attempts: u32,
	enqueued_at: Instant,
}

struct Shared<H: JobHandler> {
	spec: WorkerSpec,
	queue: JobQueue<Pending<H::Job>>,
	handler: Mutex<H>,
	running: AtomicBool,
	results: mpsc::UnboundedSender<H::Output>,
	shutdown: CancellationToken,
	registry: WorkerRegistry,
}

/// Single-purpose blocking worker.
pub struct Worker<H: JobHandler> {
	shared: Arc<Shared<H>>,
	results: Mutex<mpsc::UnboundedReceiver<H::Output>>,
	thread: Mutex<Option<JoinHandle<()>>>,
}

impl<H: JobHandler> std::fmt::Debug for Worker<H> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Worker")
			.field("name", &self.shared.spec.name)
			.field("running", &self.is_running())
			.field("pending", &self.pending())
			.finish()
	}
}

impl<H: JobHandler> Worker<H> {
	/// Creates a worker. No thread is started until the first submit.
	pub fn new(spec: WorkerSpec, handler: H, registry: WorkerRegistry) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		registry.update(&spec.name, spec.class, |_| {});
		Self {
			shared: Arc::new(Shared {
				spec,
				queue: JobQueue::new(),
				handler: Mutex::new(handler),
				running: AtomicBool::new(false),
				results: tx,
				shutdown: CancellationToken::new(),
				registry,
			}),
			results: Mutex::new(rx),
			thread: Mutex::new(None),
		}
	}

	/// Worker name.
	pub fn name(&self) -> &str {
		&self.shared.spec.name
	}

	/// Enqueues a job and makes sure the worker thread is running.
	pub fn submit(&self, job: H::Job) -> Result<(), SubmitError> {
		if self.shared.shutdown.is_cancelled() {
			return Err(SubmitError::Closed);
		}
		let pending = Pending {
			job,
			attempts: 0,
			enqueued_at: Instant::now(),
		};
		let len = self.shared.queue.push(pending).map_err(|_| SubmitError::Closed)?;
		self.shared.registry.update(&self.shared.spec.name, self.shared.spec.class, |r| r.pending = len);
		self.ensure_running()
	}

	fn ensure_running(&self) -> Result<(), SubmitError> {
		if self
			.shared
			.running
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return Ok(());
		}

		let shared = Arc::clone(&self.shared);
		let spawned = spawn_named_thread(self.shared.spec.class, format!("tessera-{}", self.shared.spec.name), move || run_loop(&shared));
		match spawned {
			Ok(handle) => {
				// A previous thread only leaves `running` after it retired, so
				// its handle can be detached.
				*self.thread.lock() = Some(handle);
				Ok(())
			}
			Err(e) => {
				self.shared.running.store(false, Ordering::Release);
				warn!(worker = %self.shared.spec.name, error = %e, "worker.spawn_failed");
				Err(SubmitError::Spawn(e))
			}
		}
	}

	/// Drains every posted output without blocking.
	pub fn drain_results(&self) -> Vec<H::Output> {
		let mut rx = self.results.lock();
		let mut out = Vec::new();
		while let Ok(item) = rx.try_recv() {
			out.push(item);
		}
		out
	}

	/// Number of queued jobs, excluding the one in flight.
	pub fn pending(&self) -> usize {
		self.shared.queue.len()
	}

	/// Returns true while a worker thread is alive.
	pub fn is_running(&self) -> bool {
		self.shared.running.load(Ordering::Acquire)
	}

	/// Token cancelled on shutdown; handlers may observe it during long calls.
	pub fn shutdown_token(&self) -> CancellationToken {
		self.shared.shutdown.clone()
	}

	/// Stops the worker and joins its thread.
	///
	/// The in-flight job completes; queued jobs are abandoned with
	/// [`Abandon::Shutdown`] and their outputs remain drainable. Idempotent.
	pub fn shutdown(&self) {
		self.shared.shutdown.cancel();
		self.shared.queue.close();
		if let Some(handle) = self.thread.lock().take()
			&& handle.join().is_err()
		{
			warn!(worker = %self.shared.spec.name, "worker.join_failed");
		}
		abandon_queued(&self.shared);
		self.shared.registry.update(&self.shared.spec.name, self.shared.spec.class, |r| {
			r.running = false;
			r.pending = 0;
			r.last_exit.get_or_insert_with(|| "shutdown".to_string());
		});
	}
}

impl<H: JobHandler> Drop for Worker<H> {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run_loop<H: JobHandler>(shared: &Shared<H>) {
	let name = &shared.spec.name;
	let class = shared.spec.class;
	debug!(worker = %name, worker_class = class.as_str(), "worker.start");
	shared.registry.update(name, class, |r| {
		r.running = true;
		r.starts += 1;
	});

	loop {
		if shared.shutdown.is_cancelled() {
			break;
		}
		match shared.queue.pop_blocking(shared.spec.idle_exit) {
			Pop::Item(pending) => process(shared, pending),
			Pop::TimedOut => {
				let retired = shared.queue.with_empty(|| shared.running.store(false, Ordering::Release));
				if retired {
					debug!(worker = %name, "worker.idle_exit");
					shared.registry.update(name, class, |r| {
						r.running = false;
						r.last_exit = Some("idle".to_string());
					});
					return;
				}
			}
			Pop::Closed => break,
		}
	}

	abandon_queued(shared);
	shared.running.store(false, Ordering::Release);
	shared.registry.update(name, class, |r| {
		r.running = false;
		r.pending = 0;
		r.last_exit = Some("shutdown".to_string());
	});
	debug!(worker = %name, "worker.stop");
}

fn process<H: JobHandler>(shared: &Shared<H>, mut pending: Pending<H::Job>) {
	pending.attempts += 1;
	let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| shared.handler.lock().run(&mut pending.job)));

	let output = match outcome {
		Ok(JobOutcome::Done(output)) => output,
		Ok(JobOutcome::Retry) => {
			let retry = shared.spec.retry;
			if retry.exhausted(pending.attempts, pending.enqueued_at) {
				warn!(worker = %shared.spec.name, attempts = pending.attempts, "worker.retry_exhausted");
				shared.handler.lock().abandon(
					pending.job,
					Abandon::RetryExhausted {
						attempts: pending.attempts,
					},
				)
			} else {
				if shared.queue.is_empty() && !retry.backoff.is_zero() {
					std::thread::sleep(retry.backoff);
				}
				match shared.queue.push(pending) {
					Ok(_) => return,
					Err(pending) => shared.handler.lock().abandon(pending.job, Abandon::Shutdown),
				}
			}
		}
		Err(payload) => {
			let msg = panic_message(payload.as_ref());
			warn!(worker = %shared.spec.name, panic = %msg, "worker.job_panicked");
			shared.handler.lock().abandon(pending.job, Abandon::Panicked(msg))
		}
	};

	let pending_len = shared.queue.len();
	shared.registry.update(&shared.spec.name, shared.spec.class, |r| {
		r.processed += 1;
		r.pending = pending_len;
	});
	let _ = shared.results.send(output);
}

fn abandon_queued<H: JobHandler>(shared: &Shared<H>) {
	let queued = shared.queue.drain();
	if queued.is_empty() {
		return;
	}
	debug!(worker = %shared.spec.name, count = queued.len(), "worker.abandon_queued");
	let mut handler = shared.handler.lock();
	for pending in queued {
		let _ = shared.results.send(handler.abandon(pending.job, Abandon::Shutdown));
	}
}

#[cfg(test)]
mod tests;
