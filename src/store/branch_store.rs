use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ImportError, Result};
use crate::scheduler::job::Revision;

/// The converted hosted branch for one target: its revision sequence in
/// commit order and the id of the tip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchHandle {
    pub target_branch_id: String,
    pub revisions: Vec<Revision>,
}

impl BranchHandle {
    fn new(target_branch_id: &str) -> Self {
        Self {
            target_branch_id: target_branch_id.to_string(),
            revisions: Vec::new(),
        }
    }

    pub fn tip(&self) -> Option<&str> {
        self.revisions.last().map(|r| r.id.as_str())
    }

    pub fn contains(&self, revision_id: &str) -> bool {
        self.revisions.iter().any(|r| r.id == revision_id)
    }
}

/// Registry of hosted branches, one file per target branch id.
///
/// Appends are idempotent (revisions already present by identity are
/// skipped, never duplicated) and atomically visible: the branch file is
/// replaced by rename, so a reader never observes a partially-appended
/// sequence. Appends to one target are also serialized against each other;
/// a stale job owner racing the job's new owner cannot overwrite the
/// other's published revisions, the slower append just lands second and
/// dedups.
#[derive(Debug)]
pub struct BranchStore {
    root: PathBuf,
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BranchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn append_lock(&self, target_branch_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        locks.entry(target_branch_id.to_string()).or_default().clone()
    }

    fn branch_path(&self, target_branch_id: &str) -> PathBuf {
        // Target ids are flat identifiers; keep path separators out of the
        // file name regardless.
        self.root
            .join(format!("{}.json", target_branch_id.replace(['/', '\\'], "-")))
    }

    /// The existing hosted branch, or `None` if this target has never been
    /// published.
    pub async fn get(&self, target_branch_id: &str) -> Result<Option<BranchHandle>> {
        let path = self.branch_path(target_branch_id);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let handle = serde_json::from_slice(&raw).map_err(|e| {
                    ImportError::Publish(format!(
                        "corrupt branch file for {}: {}",
                        target_branch_id, e
                    ))
                })?;
                Ok(Some(handle))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ImportError::Publish(format!(
                "can't read branch {}: {}",
                target_branch_id, e
            ))),
        }
    }

    /// Append `revisions` to the target branch, creating it if absent.
    /// Revisions the branch already holds are skipped by identity, so a
    /// retry after a partial prior push converges on the same content as a
    /// single complete push. The read-merge-write runs under the target's
    /// append lock; concurrent callers for the same branch queue up instead
    /// of clobbering each other's writes.
    ///
    /// Returns the updated handle and the number of revisions actually
    /// appended this call.
    pub async fn append_revisions(
        &self,
        target_branch_id: &str,
        revisions: &[Revision],
    ) -> Result<(BranchHandle, usize)> {
        let lock = self.append_lock(target_branch_id).await;
        let _guard = lock.lock().await;

        let mut handle = self
            .get(target_branch_id)
            .await?
            .unwrap_or_else(|| BranchHandle::new(target_branch_id));

        let known: HashSet<String> = handle.revisions.iter().map(|r| r.id.clone()).collect();
        let mut appended = 0;
        for revision in revisions {
            if !known.contains(&revision.id) {
                handle.revisions.push(revision.clone());
                appended += 1;
            }
        }

        if appended > 0 {
            self.write_branch(&handle).await?;
        }
        Ok((handle, appended))
    }

    async fn write_branch(&self, handle: &BranchHandle) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ImportError::Publish(format!("can't create branch store: {}", e)))?;

        let path = self.branch_path(&handle.target_branch_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(handle)?;
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| ImportError::Publish(format!("can't write branch file: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ImportError::Publish(format!("can't publish branch file: {}", e)))?;
        Ok(())
    }
}
