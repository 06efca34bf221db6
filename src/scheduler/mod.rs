//! Job scheduling: the durable job table and the allocation policy on top
//! of it.
//!
//! The [`JobStore`] owns the authoritative job records and their atomic
//! state transitions; the [`Scheduler`] layers the selection policy over
//! `claim_next` and is what worker runners poll. A miss returns "no work"
//! immediately; the scheduler never blocks a caller.

pub mod job;
pub mod policy;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use job::{CodeImportJob, CodeImportSourceDetails, ImportOutcome, JobState, RepositoryType};
pub use policy::{FewestAttemptsFirst, SelectionPolicy};
pub use store::JobStore;

/// Allocation front end: picks the best pending job for a requesting
/// machine. The claim is committed inside the store's critical section
/// before the job is returned, so a crash after allocation can never leave
/// the job visible as pending to another machine.
pub struct Scheduler {
    store: Arc<JobStore>,
    policy: Box<dyn SelectionPolicy>,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self::with_policy(store, Box::new(FewestAttemptsFirst))
    }

    pub fn with_policy(store: Arc<JobStore>, policy: Box<dyn SelectionPolicy>) -> Self {
        Self { store, policy }
    }

    /// `Some(job)` if a pending job was claimed for `hostname`, `None` if
    /// there is no work right now. Safe to call repeatedly; the caller backs
    /// off between misses.
    pub async fn job_for_machine(&self, hostname: &str) -> Option<CodeImportJob> {
        self.store.claim_next(hostname, self.policy.as_ref()).await
    }
}

/// Periodic sweep returning unresponsive machines' jobs to the pending
/// pool. Runs until the shutdown token fires.
pub async fn run_reclaim_sweeper(
    store: Arc<JobStore>,
    deadline: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let reclaimed = store.reclaim_stale(deadline).await;
                if !reclaimed.is_empty() {
                    tracing::info!(count = reclaimed.len(), "Reclaimed stale jobs");
                }
            }
        }
    }
}
