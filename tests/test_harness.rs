//! Shared fixtures for importd integration tests: an in-memory foreign
//! repository, a fake converter with failure injection, and temp-dir-backed
//! store builders.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tempfile::TempDir;

use importd::error::{ImportError, Result};
use importd::scheduler::job::{CodeImportSourceDetails, Revision};
use importd::scheduler::RepositoryType;
use importd::store::{BranchStore, ForeignTreeStore};
use importd::vcs::{ConverterRegistry, RevisionMarker, VcsConverter};
use importd::worker::ImportWorker;

/// In-memory stand-in for a foreign repository's history.
pub struct FakeForeignRepo {
    revisions: Mutex<Vec<Revision>>,
}

impl FakeForeignRepo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            revisions: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, revision: Revision) {
        self.revisions.lock().unwrap().push(revision);
    }

    pub fn revisions(&self) -> Vec<Revision> {
        self.revisions.lock().unwrap().clone()
    }

    fn tip(&self) -> RevisionMarker {
        let revs = self.revisions.lock().unwrap();
        RevisionMarker(
            revs.last()
                .map(|r| r.id.clone())
                .unwrap_or_else(|| "empty".to_string()),
        )
    }
}

/// Converter over a [`FakeForeignRepo`] with per-operation failure
/// injection and call counters.
pub struct FakeConverter {
    repo: Arc<FakeForeignRepo>,
    pub fail_checkout: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_translate: AtomicBool,
    pub checkouts: AtomicUsize,
    pub updates: AtomicUsize,
}

impl FakeConverter {
    pub fn new(repo: Arc<FakeForeignRepo>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            fail_checkout: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_translate: AtomicBool::new(false),
            checkouts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        })
    }

    pub fn checkout_count(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VcsConverter for FakeConverter {
    async fn checkout(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(ImportError::SourceUnavailable(
                "injected checkout failure".into(),
            ));
        }
        tokio::fs::create_dir_all(workdir).await?;
        Ok(self.repo.tip())
    }

    async fn update(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(ImportError::SourceUnavailable(
                "injected update failure".into(),
            ));
        }
        if !workdir.exists() {
            return Err(ImportError::SourceUnavailable("no cached tree".into()));
        }
        Ok(self.repo.tip())
    }

    async fn translate(
        &self,
        _workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>> {
        if self.fail_translate.load(Ordering::SeqCst) {
            return Err(ImportError::Conversion("injected translate failure".into()));
        }
        let revisions = self.repo.revisions();
        let start = match since {
            Some(marker) => revisions
                .iter()
                .position(|r| r.id == marker.as_str())
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        Ok(revisions[start..].to_vec())
    }
}

/// A revision with a deterministic timestamp `offset_secs` past a fixed
/// epoch, so ordering in assertions is stable.
pub fn revision(id: &str, offset_secs: i64) -> Revision {
    Revision {
        id: id.to_string(),
        author: "Alice Example".to_string(),
        message: format!("commit {}", id),
        timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
            + ChronoDuration::seconds(offset_secs),
    }
}

pub fn source_details(target: &str) -> CodeImportSourceDetails {
    CodeImportSourceDetails {
        repository_type: RepositoryType::Git,
        source_url: "git://example.org/project".to_string(),
        target_branch_id: target.to_string(),
        log_destination: None,
    }
}

/// Worker plus stores wired to a fake converter under a temp directory.
pub struct TestEnv {
    pub repo: Arc<FakeForeignRepo>,
    pub converter: Arc<FakeConverter>,
    pub trees: Arc<ForeignTreeStore>,
    pub branches: Arc<BranchStore>,
    pub worker: Arc<ImportWorker>,
    // Held so the cache directories outlive the test body.
    pub tmp: TempDir,
}

pub fn test_env() -> TestEnv {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let repo = FakeForeignRepo::new();
    let converter = FakeConverter::new(repo.clone());

    let mut registry = ConverterRegistry::default();
    registry.register(RepositoryType::Git, converter.clone());

    let trees = Arc::new(ForeignTreeStore::new(tmp.path().join("trees")));
    let branches = Arc::new(BranchStore::new(tmp.path().join("branches")));
    let worker = Arc::new(ImportWorker::with_converters(
        trees.clone(),
        branches.clone(),
        registry,
    ));

    TestEnv {
        repo,
        converter,
        trees,
        branches,
        worker,
        tmp,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn assert_eventually<F>(timeout: Duration, what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
