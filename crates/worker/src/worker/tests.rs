use std::sync::atomic::AtomicUsize;

use pretty_assertions::assert_eq;

use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Out {
	Done(&'static str),
	Abandoned(&'static str, Abandon),
}

/// Completes every job, except ids listed in `not_ready` which retry until
/// `ready` is raised.
struct Recorder {
	ready: Arc<AtomicBool>,
	not_ready: Vec<&'static str>,
	calls: Arc<AtomicUsize>,
}

impl Recorder {
	fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			not_ready: Vec::new(),
			calls: Arc::new(AtomicUsize::new(0)),
		}
	}
}

struct Job {
	id: &'static str,
	attempts: u32,
}

impl Job {
	fn new(id: &'static str) -> Self {
		Self { id, attempts: 0 }
	}
}

impl JobHandler for Recorder {
	type Job = Job;
	type Output = Out;

	fn run(&mut self, job: &mut Job) -> JobOutcome<Out> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		job.attempts += 1;
		if job.id == "panic" {
			panic!("native call blew up");
		}
		if self.not_ready.contains(&job.id) && !self.ready.load(Ordering::SeqCst) {
			return JobOutcome::Retry;
		}
		JobOutcome::Done(Out::Done(job.id))
	}

	fn abandon(&mut self, job: Job, reason: Abandon) -> Out {
		Out::Abandoned(job.id, reason)
	}
}

fn collect<H: JobHandler>(worker: &Worker<H>, count: usize) -> Vec<H::Output> {
	let deadline = Instant::now() + Duration::from_secs(5);
	let mut out = Vec::new();
	while out.len() < count && Instant::now() < deadline {
		out.extend(worker.drain_results());
		std::thread::sleep(Duration::from_millis(1));
	}
	out
}

fn fast_retry() -> RetryPolicy {
	RetryPolicy {
		max_attempts: 1000,
		ttl: Duration::from_secs(5),
		backoff: Duration::from_millis(1),
	}
}

#[test]
fn results_follow_submission_order() {
	let worker = Worker::new(WorkerSpec::new("save", TaskClass::PersistSave), Recorder::new(), WorkerRegistry::new());
	for id in ["A", "B", "C"] {
		worker.submit(Job::new(id)).unwrap();
	}
	assert_eq!(collect(&worker, 3), vec![Out::Done("A"), Out::Done("B"), Out::Done("C")]);
}

#[test]
fn thread_starts_lazily() {
	let worker = Worker::new(WorkerSpec::new("lazy", TaskClass::PersistLoad), Recorder::new(), WorkerRegistry::new());
	assert!(!worker.is_running());
	worker.submit(Job::new("A")).unwrap();
	assert!(worker.is_running());
	assert_eq!(collect(&worker, 1), vec![Out::Done("A")]);
}

#[test]
fn unready_job_moves_behind_ready_ones() {
	let mut handler = Recorder::new();
	handler.not_ready = vec!["A"];
	let ready = Arc::clone(&handler.ready);
	let spec = WorkerSpec::new("retry", TaskClass::PersistSave).retry(fast_retry());
	let worker = Worker::new(spec, handler, WorkerRegistry::new());

	for id in ["A", "B"] {
		worker.submit(Job::new(id)).unwrap();
	}
	assert_eq!(collect(&worker, 1), vec![Out::Done("B")]);
	ready.store(true, Ordering::SeqCst);
	assert_eq!(collect(&worker, 1), vec![Out::Done("A")]);
}

#[test]
fn retry_is_bounded_by_attempts() {
	let mut handler = Recorder::new();
	handler.not_ready = vec!["A"];
	let spec = WorkerSpec::new("bounded", TaskClass::PersistSave).retry(RetryPolicy {
		max_attempts: 3,
		..fast_retry()
	});
	let worker = Worker::new(spec, handler, WorkerRegistry::new());
	worker.submit(Job::new("A")).unwrap();
	assert_eq!(collect(&worker, 1), vec![Out::Abandoned("A", Abandon::RetryExhausted { attempts: 3 })]);
}

#[test]
fn retry_is_bounded_by_ttl() {
	let mut handler = Recorder::new();
	handler.not_ready = vec!["A"];
	let spec = WorkerSpec::new("ttl", TaskClass::PersistSave).retry(RetryPolicy {
		max_attempts: u32::MAX,
		ttl: Duration::from_millis(20),
		backoff: Duration::from_millis(2),
	});
	let worker = Worker::new(spec, handler, WorkerRegistry::new());
	worker.submit(Job::new("A")).unwrap();
	let out = collect(&worker, 1);
	assert_eq!(out.len(), 1);
	assert!(matches!(out[0], Out::Abandoned("A", Abandon::RetryExhausted { .. })));
}

#[test]
fn panicking_job_is_reported_and_worker_survives() {
	let worker = Worker::new(WorkerSpec::new("panic", TaskClass::PersistLoad), Recorder::new(), WorkerRegistry::new());
	worker.submit(Job::new("panic")).unwrap();
	worker.submit(Job::new("B")).unwrap();
	let out = collect(&worker, 2);
	assert_eq!(
		out,
		vec![Out::Abandoned("panic", Abandon::Panicked("native call blew up".into())), Out::Done("B")]
	);
}

#[test]
fn shutdown_abandons_queued_and_rejects_new_work() {
	let mut handler = Recorder::new();
	handler.not_ready = vec!["A"];
	let spec = WorkerSpec::new("shutdown", TaskClass::PersistSave).retry(RetryPolicy {
		max_attempts: u32::MAX,
		ttl: Duration::from_secs(60),
		backoff: Duration::from_millis(1),
	});
	let worker = Worker::new(spec, handler, WorkerRegistry::new());
	worker.submit(Job::new("A")).unwrap();
	std::thread::sleep(Duration::from_millis(10));

	worker.shutdown();
	assert!(!worker.is_running());
	assert_eq!(worker.drain_results(), vec![Out::Abandoned("A", Abandon::Shutdown)]);
	assert!(matches!(worker.submit(Job::new("B")), Err(SubmitError::Closed)));
	worker.shutdown();
}

#[test]
fn idle_worker_retires_and_restarts() {
	let registry = WorkerRegistry::new();
	let spec = WorkerSpec::new("idle", TaskClass::PersistLoad).idle_exit(Some(Duration::from_millis(5)));
	let worker = Worker::new(spec, Recorder::new(), registry.clone());

	worker.submit(Job::new("A")).unwrap();
	assert_eq!(collect(&worker, 1), vec![Out::Done("A")]);

	let deadline = Instant::now() + Duration::from_secs(5);
	while worker.is_running() && Instant::now() < deadline {
		std::thread::sleep(Duration::from_millis(1));
	}
	assert!(!worker.is_running());

	worker.submit(Job::new("B")).unwrap();
	assert_eq!(collect(&worker, 1), vec![Out::Done("B")]);
	let record = registry.get("idle").unwrap();
	assert_eq!(record.starts, 2);
	assert_eq!(record.processed, 2);
}

#[test]
fn concurrent_submits_start_one_thread() {
	let registry = WorkerRegistry::new();
	let handler = Recorder::new();
	let calls = Arc::clone(&handler.calls);
	let worker = Arc::new(Worker::new(WorkerSpec::new("race", TaskClass::PersistSave), handler, registry.clone()));

	let submitters: Vec<_> = (0..8)
		.map(|_| {
			let worker = Arc::clone(&worker);
			std::thread::spawn(move || {
				for _ in 0..16 {
					worker.submit(Job::new("X")).unwrap();
				}
			})
		})
		.collect();
	for s in submitters {
		s.join().unwrap();
	}

	assert_eq!(collect(&worker, 128).len(), 128);
	assert_eq!(calls.load(Ordering::SeqCst), 128);
	assert_eq!(registry.get("race").unwrap().starts, 1);
}
