use std::cmp::Ordering;

use crate::scheduler::job::CodeImportJob;

/// Ordering between pending jobs during allocation. The job that compares
/// `Less` is claimed first.
///
/// The policy is a pluggable comparator rather than a fixed law; deployments
/// wanting a different fairness scheme implement this trait and hand it to
/// the scheduler.
pub trait SelectionPolicy: Send + Sync {
    fn compare(&self, a: &CodeImportJob, b: &CodeImportJob) -> Ordering;
}

/// Default policy: lowest attempt count first, so fresh jobs are not starved
/// behind a repeatedly-failing one, tie-broken by oldest enqueue time.
#[derive(Debug, Default)]
pub struct FewestAttemptsFirst;

impl SelectionPolicy for FewestAttemptsFirst {
    fn compare(&self, a: &CodeImportJob, b: &CodeImportJob) -> Ordering {
        a.attempt_count
            .cmp(&b.attempt_count)
            .then(a.enqueued_at.cmp(&b.enqueued_at))
    }
}
