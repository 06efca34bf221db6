use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduler::JobStore;

/// Heartbeat task that keeps one running job alive in the job store.
///
/// Ticks at a bounded interval for the whole pipeline run. Losing ownership
/// (the job was reclaimed and possibly handed to another machine) cancels
/// the run token so the pipeline aborts at its next checkpoint.
pub struct HeartbeatTask {
    interval: Duration,
}

impl HeartbeatTask {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run until the run token is cancelled or ownership is lost.
    pub async fn run(
        self,
        store: Arc<JobStore>,
        job_id: Uuid,
        hostname: String,
        run_token: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it, the claim already
        // stamped a fresh heartbeat.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = run_token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = store.heartbeat(job_id, &hostname).await {
                        tracing::warn!(
                            job_id = %job_id,
                            machine = %hostname,
                            error = %e,
                            "Lost job ownership, aborting run"
                        );
                        run_token.cancel();
                        break;
                    }
                }
            }
        }
    }
}
