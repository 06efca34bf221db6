use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::scheduler::job::{
    CodeImportJob, CodeImportSourceDetails, FailureCategory, ImportOutcome, JobState,
};
use crate::scheduler::policy::SelectionPolicy;

/// Single source of truth for all code-import jobs and their states.
///
/// The job table is the only state mutated by multiple machines, so every
/// mutating operation runs as one critical section under the write lock.
/// `claim_next` in particular commits the whole select-and-mark step
/// atomically: no two callers can ever be handed the same pending job.
#[derive(Debug)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, CodeImportJob>>,
    max_attempts: u32,
}

impl JobStore {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Register a new import. Fails with `DuplicateJob` if an active
    /// (non-terminal) job already targets the same branch.
    pub async fn enqueue(&self, source: CodeImportSourceDetails) -> Result<Uuid> {
        let mut jobs = self.jobs.write().await;

        let duplicate = jobs
            .values()
            .any(|j| !j.is_terminal() && j.source.target_branch_id == source.target_branch_id);
        if duplicate {
            return Err(ImportError::DuplicateJob(source.target_branch_id));
        }

        let job = CodeImportJob::new(source);
        let id = job.id;
        tracing::info!(
            job_id = %id,
            target = %job.source.target_branch_id,
            url = %job.source.source_url,
            "Import job registered"
        );
        jobs.insert(id, job);
        Ok(id)
    }

    /// Atomically select the best pending job per `policy`, mark it assigned
    /// to `hostname`, and return it. Returns `None` when no eligible job
    /// exists; the caller is expected to back off and poll again.
    ///
    /// Pending jobs already at the attempt cap are moved to `Failed` here
    /// rather than offered (a reclaimed job re-enters `Pending` with its
    /// attempt count preserved, so the cap has to be enforced on selection
    /// as well as on result reporting).
    pub async fn claim_next(
        &self,
        hostname: &str,
        policy: &dyn SelectionPolicy,
    ) -> Option<CodeImportJob> {
        let mut jobs = self.jobs.write().await;

        let capped: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.state == JobState::Pending && j.attempt_count >= self.max_attempts)
            .map(|j| j.id)
            .collect();
        for id in capped {
            if let Some(job) = jobs.get_mut(&id) {
                job.state = JobState::Failed;
                tracing::warn!(
                    job_id = %id,
                    attempts = job.attempt_count,
                    "Job reached attempt cap, marked failed until operator intervention"
                );
            }
        }

        let best = jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .min_by(|a, b| policy.compare(a, b))
            .map(|j| j.id)?;

        let job = jobs.get_mut(&best)?;
        let now = Utc::now();
        job.state = JobState::Assigned;
        job.assigned_machine = Some(hostname.to_string());
        job.attempt_count += 1;
        job.assigned_at = Some(now);
        job.last_heartbeat_at = Some(now);
        tracing::info!(
            job_id = %job.id,
            machine = hostname,
            attempt = job.attempt_count,
            "Job claimed"
        );
        Some(job.clone())
    }

    /// Worker has started executing the pipeline: `Assigned` -> `Running`.
    pub async fn mark_running(&self, job_id: Uuid, hostname: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ImportError::JobNotFound(job_id))?;

        if !job.is_owned_by(hostname) || job.state != JobState::Assigned {
            return Err(ImportError::NotOwner {
                job_id,
                machine: hostname.to_string(),
            });
        }
        job.state = JobState::Running;
        Ok(())
    }

    /// Refresh the heartbeat of a job this machine owns. `NotOwner` tells
    /// the caller the job was reclaimed out from under it; the caller must
    /// abort its local run and discard in-progress state.
    pub async fn heartbeat(&self, job_id: Uuid, hostname: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ImportError::JobNotFound(job_id))?;

        let active = matches!(job.state, JobState::Assigned | JobState::Running);
        if !active || !job.is_owned_by(hostname) {
            return Err(ImportError::NotOwner {
                job_id,
                machine: hostname.to_string(),
            });
        }
        job.last_heartbeat_at = Some(Utc::now());
        Ok(())
    }

    /// Record the outcome of a run. A success is terminal; a failure below
    /// the attempt cap returns the job to `Pending` so it can be retried on
    /// any machine, and at the cap rests in terminal `Failed` where it stays
    /// visible until an operator re-enqueues or dismisses it.
    ///
    /// Returns the state the job settled in.
    pub async fn report_result(
        &self,
        job_id: Uuid,
        hostname: &str,
        outcome: ImportOutcome,
    ) -> Result<JobState> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ImportError::JobNotFound(job_id))?;

        let active = matches!(job.state, JobState::Assigned | JobState::Running);
        if !active || !job.is_owned_by(hostname) {
            return Err(ImportError::NotOwner {
                job_id,
                machine: hostname.to_string(),
            });
        }

        job.last_run_at = Some(Utc::now());
        let new_state = if outcome.success {
            JobState::Succeeded
        } else if job.attempt_count >= self.max_attempts {
            JobState::Failed
        } else {
            JobState::Pending
        };

        match (&new_state, &outcome.error_detail) {
            (JobState::Succeeded, _) => {
                tracing::info!(
                    job_id = %job_id,
                    revisions = outcome.revisions_imported,
                    "Import succeeded"
                );
            }
            (state, Some(detail)) => {
                // Conversion failures likely reproduce identically, so they
                // get operator-visible warnings from the first occurrence.
                if detail.category == FailureCategory::Conversion {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = job.attempt_count,
                        error = %detail.message,
                        "Conversion failure, operator attention suggested"
                    );
                } else {
                    tracing::info!(
                        job_id = %job_id,
                        attempt = job.attempt_count,
                        category = %detail.category,
                        state = %state,
                        "Import failed"
                    );
                }
            }
            _ => {}
        }

        job.state = new_state;
        job.last_result = Some(outcome);
        if new_state == JobState::Pending {
            job.assigned_machine = None;
            job.assigned_at = None;
        }
        Ok(new_state)
    }

    /// Background sweep: any assigned or running job whose heartbeat is
    /// older than `deadline` is presumed dead, passed through `Reclaimed`
    /// and returned to the pending pool with its attempt count preserved.
    ///
    /// Returns the ids of the reclaimed jobs.
    pub async fn reclaim_stale(&self, deadline: Duration) -> Vec<Uuid> {
        let mut jobs = self.jobs.write().await;
        // A deadline too large for calendar arithmetic never lapses.
        let cutoff = chrono::Duration::from_std(deadline)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));

        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            if !matches!(job.state, JobState::Assigned | JobState::Running) {
                continue;
            }
            let last_seen = job.last_heartbeat_at.or(job.assigned_at);
            let overdue = match (last_seen, cutoff) {
                (Some(t), Some(c)) => t < c,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if overdue {
                tracing::warn!(
                    job_id = %job.id,
                    machine = ?job.assigned_machine,
                    attempt = job.attempt_count,
                    "Heartbeat deadline lapsed, reclaiming job"
                );
                job.state = JobState::Reclaimed;
                job.assigned_machine = None;
                job.assigned_at = None;
                job.state = JobState::Pending;
                reclaimed.push(job.id);
            }
        }
        reclaimed
    }

    /// Operator action: force a job into terminal `Failed` and stop offering
    /// it regardless of its attempt count.
    pub async fn give_up(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ImportError::JobNotFound(job_id))?;
        tracing::warn!(job_id = %job_id, "Job failed by operator request");
        job.state = JobState::Failed;
        job.assigned_machine = None;
        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Option<CodeImportJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// All jobs sorted chronologically by enqueue time.
    pub async fn all_jobs(&self) -> Vec<CodeImportJob> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<CodeImportJob> = jobs.values().cloned().collect();
        all.sort_by_key(|j| j.enqueued_at);
        all
    }

    /// Ids of terminal jobs, used by the cache eviction sweep.
    pub async fn terminal_job_ids(&self) -> Vec<Uuid> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| j.id)
            .collect()
    }
}
