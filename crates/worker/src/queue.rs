use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of a blocking pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
	/// Next item in FIFO order.
	Item(T),
	/// The queue stayed empty for the whole timeout.
	TimedOut,
	/// The queue was closed. Items still queued are left for [`JobQueue::drain`].
	Closed,
}

struct QueueState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct QueueInner<T> {
	state: Mutex<QueueState<T>>,
	notify: Condvar,
}

/// Unbounded multi-producer FIFO queue with a blocking consumer side.
///
/// Producers never block. The single consumer parks on a condvar until an item
/// arrives, the queue is closed, or its timeout elapses.
pub struct JobQueue<T> {
	inner: Arc<QueueInner<T>>,
}

impl<T> Clone for JobQueue<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> std::fmt::Debug for JobQueue<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("JobQueue")
			.field("len", &state.queue.len())
			.field("closed", &state.closed)
			.finish()
	}
}

impl<T> Default for JobQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> JobQueue<T> {
	/// Creates an open, empty queue.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(QueueInner {
				state: Mutex::new(QueueState {
					queue: VecDeque::new(),
					closed: false,
				}),
				notify: Condvar::new(),
			}),
		}
	}

	/// Appends an item. Hands the item back when the queue is closed.
	pub fn push(&self, item: T) -> Result<usize, T> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(item);
		}
		state.queue.push_back(item);
		let len = state.queue.len();
		drop(state);
		self.inner.notify.notify_one();
		Ok(len)
	}

	/// Waits for the next item, up to `timeout` when given.
	pub fn pop_blocking(&self, timeout: Option<Duration>) -> Pop<T> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let mut state = self.inner.state.lock();
		loop {
			if state.closed {
				return Pop::Closed;
			}
			if let Some(item) = state.queue.pop_front() {
				return Pop::Item(item);
			}
			match deadline {
				Some(deadline) => {
					if self.inner.notify.wait_until(&mut state, deadline).timed_out() && state.queue.is_empty() && !state.closed {
						return Pop::TimedOut;
					}
				}
				None => self.inner.notify.wait(&mut state),
			}
		}
	}

	/// Runs `f` under the queue lock when the queue is empty.
	///
	/// Lets a consumer retire atomically with respect to producers: an item
	/// pushed concurrently is either visible here (and `f` is not called) or
	/// pushed after `f` ran.
	pub fn with_empty(&self, f: impl FnOnce()) -> bool {
		let state = self.inner.state.lock();
		if state.queue.is_empty() {
			f();
			true
		} else {
			false
		}
	}

	/// Closes the queue and wakes the consumer.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		self.inner.notify.notify_all();
	}

	/// Removes every queued item.
	pub fn drain(&self) -> Vec<T> {
		self.inner.state.lock().queue.drain(..).collect()
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns true when no item is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns true once [`Self::close`] was called.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}
}
