//! Allocation policy: claim ordering under the default policy and the
//! pluggable comparator seam.

mod test_harness;

use std::cmp::Ordering;
use std::sync::Arc;

use importd::scheduler::job::{CodeImportJob, FailureCategory};
use importd::scheduler::{ImportOutcome, JobState, JobStore, Scheduler, SelectionPolicy};

use test_harness::source_details;

#[tokio::test]
async fn default_policy_prefers_fewest_attempts() {
    let store = Arc::new(JobStore::new(5));
    let scheduler = Scheduler::new(store.clone());

    // First job fails once, so it carries attempt_count 1 back to pending.
    let retried_id = store.enqueue(source_details("~team/a")).await.unwrap();
    let claimed = scheduler.job_for_machine("worker-1").await.unwrap();
    assert_eq!(claimed.id, retried_id);
    store
        .report_result(
            retried_id,
            "worker-1",
            ImportOutcome::failure(FailureCategory::SourceUnavailable, "timeout"),
        )
        .await
        .unwrap();

    // A younger job with zero attempts is offered before the retry.
    let fresh_id = store.enqueue(source_details("~team/b")).await.unwrap();
    let first = scheduler.job_for_machine("worker-1").await.unwrap();
    assert_eq!(first.id, fresh_id);
    let second = scheduler.job_for_machine("worker-1").await.unwrap();
    assert_eq!(second.id, retried_id);
}

#[tokio::test]
async fn equal_attempts_tie_break_on_enqueue_order() {
    let store = Arc::new(JobStore::new(5));
    let scheduler = Scheduler::new(store.clone());

    let older = store.enqueue(source_details("~team/a")).await.unwrap();
    let newer = store.enqueue(source_details("~team/b")).await.unwrap();

    assert_eq!(scheduler.job_for_machine("worker-1").await.unwrap().id, older);
    assert_eq!(scheduler.job_for_machine("worker-1").await.unwrap().id, newer);
}

#[tokio::test]
async fn miss_returns_none_without_blocking() {
    let store = Arc::new(JobStore::new(5));
    let scheduler = Scheduler::new(store);
    assert!(scheduler.job_for_machine("worker-1").await.is_none());
}

#[tokio::test]
async fn capped_pending_jobs_are_failed_not_offered() {
    let store = Arc::new(JobStore::new(1));
    let scheduler = Scheduler::new(store.clone());

    let job_id = store.enqueue(source_details("~team/a")).await.unwrap();
    scheduler.job_for_machine("worker-1").await.unwrap();

    // Reclaim leaves attempt_count at the cap while the job is pending.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.reclaim_stale(std::time::Duration::ZERO).await;

    assert!(scheduler.job_for_machine("worker-2").await.is_none());
    assert_eq!(store.get(job_id).await.unwrap().state, JobState::Failed);
}

/// Inverse of the default: most attempts first. Only exists to prove the
/// comparator seam is honored.
struct MostAttemptsFirst;

impl SelectionPolicy for MostAttemptsFirst {
    fn compare(&self, a: &CodeImportJob, b: &CodeImportJob) -> Ordering {
        b.attempt_count
            .cmp(&a.attempt_count)
            .then(a.enqueued_at.cmp(&b.enqueued_at))
    }
}

#[tokio::test]
async fn custom_policy_overrides_claim_order() {
    let store = Arc::new(JobStore::new(5));

    let retried_id = store.enqueue(source_details("~team/a")).await.unwrap();
    {
        let scheduler = Scheduler::new(store.clone());
        scheduler.job_for_machine("worker-1").await.unwrap();
        store
            .report_result(
                retried_id,
                "worker-1",
                ImportOutcome::failure(FailureCategory::SourceUnavailable, "timeout"),
            )
            .await
            .unwrap();
    }
    let fresh_id = store.enqueue(source_details("~team/b")).await.unwrap();

    let scheduler = Scheduler::with_policy(store.clone(), Box::new(MostAttemptsFirst));
    assert_eq!(
        scheduler.job_for_machine("worker-1").await.unwrap().id,
        retried_id
    );
    assert_eq!(
        scheduler.job_for_machine("worker-1").await.unwrap().id,
        fresh_id
    );
}
