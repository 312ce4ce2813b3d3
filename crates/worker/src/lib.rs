//! Blocking worker primitives for tessera.
//!
//! Native persistence calls block for an unbounded time and must never run on
//! the frame thread. This crate provides the long-lived worker thread, its FIFO
//! job queue, and the result queue drained once per frame.

mod class;
pub mod queue;
pub mod registry;
mod spawn;
pub mod worker;

pub use class::TaskClass;
pub use queue::{JobQueue, Pop};
pub use registry::{WorkerRecord, WorkerRegistry};
pub use spawn::spawn_named_thread;
pub use worker::{Abandon, JobHandler, JobOutcome, RetryPolicy, SubmitError, Worker, WorkerSpec};
