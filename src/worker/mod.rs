//! Import execution: the per-job pipeline, the heartbeat that keeps a run
//! alive, and the top-level runner loop.
//!
//! # Execution flow
//!
//! 1. [`WorkerRunner`] polls the scheduler for a claim
//! 2. [`ImportWorker::run`] fetches, converts, and publishes the job
//! 3. [`HeartbeatTask`] ticks throughout and aborts the run on a lost claim
//! 4. The outcome is reported back to the job store
//!
//! Cancellation is cooperative: the pipeline checks its token between
//! stages rather than being preempted, so a job's caches are always left
//! resumable.

pub mod heartbeat;
pub mod pipeline;
pub mod runner;

pub use heartbeat::HeartbeatTask;
pub use pipeline::ImportWorker;
pub use runner::WorkerRunner;
