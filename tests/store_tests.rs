//! Persistence layers: the hosted branch registry and the foreign tree
//! cache.

mod test_harness;

use std::time::Duration;

use uuid::Uuid;

use importd::store::BranchStore;

use test_harness::{revision, test_env};

#[tokio::test]
async fn branch_append_is_idempotent_by_revision_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let store = BranchStore::new(tmp.path());

    let (handle, appended) = store
        .append_revisions("~team/trunk", &[revision("r1", 0), revision("r2", 1)])
        .await
        .unwrap();
    assert_eq!(appended, 2);
    assert_eq!(handle.tip(), Some("r2"));

    // Overlapping push: only the genuinely new revision lands.
    let (handle, appended) = store
        .append_revisions("~team/trunk", &[revision("r2", 1), revision("r3", 2)])
        .await
        .unwrap();
    assert_eq!(appended, 1);
    assert_eq!(handle.revisions.len(), 3);
    assert_eq!(handle.tip(), Some("r3"));

    // A full replay appends nothing and changes nothing.
    let (handle, appended) = store
        .append_revisions(
            "~team/trunk",
            &[revision("r1", 0), revision("r2", 1), revision("r3", 2)],
        )
        .await
        .unwrap();
    assert_eq!(appended, 0);
    assert_eq!(handle.revisions.len(), 3);
}

#[tokio::test]
async fn concurrent_appends_to_one_target_lose_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(BranchStore::new(tmp.path()));

    // Two appenders racing on a fresh branch, as when a reclaimed job's
    // stale owner publishes alongside the new owner.
    let (a, b) = (store.clone(), store.clone());
    let first = tokio::spawn(async move {
        a.append_revisions("~team/trunk", &[revision("ra", 0)]).await
    });
    let second = tokio::spawn(async move {
        b.append_revisions("~team/trunk", &[revision("rb", 1)]).await
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let handle = store.get("~team/trunk").await.unwrap().unwrap();
    assert!(handle.contains("ra"), "first appender's revision lost");
    assert!(handle.contains("rb"), "second appender's revision lost");

    // Wider fan-out on an existing branch: every appended revision lands
    // exactly once.
    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .append_revisions("~team/trunk", &[revision(&format!("c{}", i), 10 + i)])
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let handle = store.get("~team/trunk").await.unwrap().unwrap();
    assert_eq!(handle.revisions.len(), 18);
    for i in 0..16 {
        assert!(handle.contains(&format!("c{}", i)));
    }
}

#[tokio::test]
async fn branch_created_on_first_append_and_persisted() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let store = BranchStore::new(tmp.path());
        assert!(store.get("~team/trunk").await.unwrap().is_none());
        store
            .append_revisions("~team/trunk", &[revision("r1", 0)])
            .await
            .unwrap();
    }

    // A new store over the same root sees the published branch.
    let store = BranchStore::new(tmp.path());
    let handle = store.get("~team/trunk").await.unwrap().unwrap();
    assert_eq!(handle.target_branch_id, "~team/trunk");
    assert!(handle.contains("r1"));
    assert!(!handle.contains("r2"));
}

#[tokio::test]
async fn branch_write_leaves_no_temp_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = BranchStore::new(tmp.path());

    store
        .append_revisions("~team/trunk", &[revision("r1", 0)])
        .await
        .unwrap();
    store
        .append_revisions("~team/trunk", &[revision("r2", 1)])
        .await
        .unwrap();

    for item in std::fs::read_dir(tmp.path()).unwrap() {
        let name = item.unwrap().file_name();
        let name = name.to_string_lossy().into_owned();
        assert!(!name.ends_with(".tmp"), "leftover temp file {}", name);
    }
}

#[tokio::test]
async fn tree_prepare_checks_out_then_updates_incrementally() {
    let env = test_env();
    let job_id = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    // First run: no cached tree, full checkout, no resumable marker.
    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    assert!(checkout.previous_marker.is_none());
    assert_eq!(checkout.current_marker.as_str(), "r1");
    assert_eq!(env.converter.checkout_count(), 1);

    env.trees.commit(job_id, &checkout.current_marker).await.unwrap();
    assert_eq!(
        env.trees.last_synced(job_id).await.unwrap().as_str(),
        "r1"
    );

    // Second run: cached tree plus committed metadata means an update, and
    // the committed position is handed back for incremental translation.
    env.repo.push(revision("r2", 1));
    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    assert_eq!(env.converter.update_count(), 1);
    assert_eq!(env.converter.checkout_count(), 1);
    assert_eq!(
        checkout.previous_marker.as_ref().map(|m| m.as_str()),
        Some("r1")
    );
    assert_eq!(checkout.current_marker.as_str(), "r2");
}

#[tokio::test]
async fn tree_update_failure_falls_back_to_full_checkout() {
    let env = test_env();
    let job_id = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    env.trees.commit(job_id, &checkout.current_marker).await.unwrap();

    env.converter
        .fail_update
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    assert_eq!(env.converter.update_count(), 1);
    assert_eq!(env.converter.checkout_count(), 2);
    // The replaced tree cannot resume; translation restarts from scratch.
    assert!(checkout.previous_marker.is_none());
}

#[tokio::test]
async fn interrupted_first_run_is_replaced_not_resumed() {
    let env = test_env();
    let job_id = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    // Prepared but never committed: the tree exists with no metadata.
    env.trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    assert!(env.trees.last_synced(job_id).await.is_none());

    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    assert_eq!(env.converter.update_count(), 0);
    assert_eq!(env.converter.checkout_count(), 2);
    assert!(checkout.previous_marker.is_none());
}

#[tokio::test]
async fn evict_drops_only_stale_terminal_entries() {
    let env = test_env();
    let terminal_job = Uuid::new_v4();
    let active_job = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    for job_id in [terminal_job, active_job] {
        let checkout = env
            .trees
            .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
            .await
            .unwrap();
        env.trees.commit(job_id, &checkout.current_marker).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    let removed = env
        .trees
        .evict(Duration::ZERO, |id| id == terminal_job)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(env.trees.last_synced(terminal_job).await.is_none());
    assert!(env.trees.last_synced(active_job).await.is_some());

    // Within the retention window nothing further is dropped.
    let removed = env
        .trees
        .evict(Duration::from_secs(3600), |_| true)
        .await
        .unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn oversized_retention_keeps_committed_entries() {
    let env = test_env();
    let job_id = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    let checkout = env
        .trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();
    env.trees.commit(job_id, &checkout.current_marker).await.unwrap();

    // A retention beyond calendar range must mean "keep forever".
    let removed = env
        .trees
        .evict(Duration::from_secs(u64::MAX), |_| true)
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert!(env.trees.last_synced(job_id).await.is_some());
}

#[tokio::test]
async fn evict_drops_terminal_entries_with_no_metadata() {
    let env = test_env();
    let job_id = Uuid::new_v4();
    env.repo.push(revision("r1", 0));

    // Interrupted before commit: directory exists, entry.json does not.
    env.trees
        .prepare(job_id, env.converter.as_ref(), "git://example.org/project")
        .await
        .unwrap();

    let removed = env
        .trees
        .evict(Duration::from_secs(3600), |_| true)
        .await
        .unwrap();
    assert_eq!(removed, 1);
}
