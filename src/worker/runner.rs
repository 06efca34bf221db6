use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ImportError, Result};
use crate::scheduler::{JobStore, Scheduler};
use crate::worker::heartbeat::HeartbeatTask;
use crate::worker::pipeline::ImportWorker;

/// Top-level worker loop for one machine (or worker slot): ask the
/// scheduler for work, run the import pipeline, report the outcome, back
/// off while idle.
pub struct WorkerRunner {
    hostname: String,
    store: Arc<JobStore>,
    scheduler: Arc<Scheduler>,
    worker: Arc<ImportWorker>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl WorkerRunner {
    pub fn new(
        hostname: impl Into<String>,
        store: Arc<JobStore>,
        scheduler: Arc<Scheduler>,
        worker: Arc<ImportWorker>,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            store,
            scheduler,
            worker,
            poll_interval,
            heartbeat_interval,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Poll-run-report until the shutdown token fires. The backoff between
    /// misses lives here, not in the scheduler.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(machine = %self.hostname, "Worker runner started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_one(&shutdown).await {
                Ok(true) => {
                    // Handled a job; ask again right away.
                }
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(machine = %self.hostname, error = %e, "Worker iteration failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::info!(machine = %self.hostname, "Worker runner stopped");
    }

    /// Claim and execute at most one job. Returns `Ok(true)` if a job was
    /// handled, `Ok(false)` on a scheduler miss.
    pub async fn run_one(&self, shutdown: &CancellationToken) -> Result<bool> {
        let Some(job) = self.scheduler.job_for_machine(&self.hostname).await else {
            return Ok(false);
        };

        self.store.mark_running(job.id, &self.hostname).await?;

        let run_token = shutdown.child_token();
        let heartbeat = tokio::spawn(HeartbeatTask::new(self.heartbeat_interval).run(
            self.store.clone(),
            job.id,
            self.hostname.clone(),
            run_token.clone(),
        ));

        let outcome = self.worker.run(job.id, &job.source, &run_token).await;

        run_token.cancel();
        let _ = heartbeat.await;

        match self
            .store
            .report_result(job.id, &self.hostname, outcome)
            .await
        {
            Ok(state) => {
                tracing::debug!(job_id = %job.id, state = %state, "Outcome reported");
            }
            Err(ImportError::NotOwner { .. }) => {
                // Reclaimed mid-run; the job is someone else's now and our
                // result is void.
                tracing::warn!(
                    job_id = %job.id,
                    machine = %self.hostname,
                    "Job was reclaimed during the run, result discarded"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }
}
