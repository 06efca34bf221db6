use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::vcs::{RevisionMarker, VcsConverter};

/// Cache metadata for one job's materialized checkout. Owned exclusively by
/// this store; the marker records the last history position that made it all
/// the way through a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForeignTreeCacheEntry {
    last_synced: RevisionMarker,
    last_access: DateTime<Utc>,
}

/// A prepared working tree handed to the conversion stage.
///
/// `previous_marker` is the position already published on a prior run (so
/// translation can start there), present only when the cached tree was
/// updated incrementally. After a fresh checkout it is `None` and the branch
/// store's revision-identity dedup absorbs the overlap.
#[derive(Debug)]
pub struct TreeCheckout {
    pub path: PathBuf,
    pub previous_marker: Option<RevisionMarker>,
    pub current_marker: RevisionMarker,
}

/// Cache of materialized foreign checkouts, one directory per job id.
///
/// Layout: `<root>/<job-id>/tree` holds the working copy and
/// `<root>/<job-id>/entry.json` the metadata. The metadata is only advanced
/// by [`commit`](ForeignTreeStore::commit) after a successful publish, so an
/// interrupted run leaves the entry exactly as the previous successful run
/// did and the next attempt resumes from a consistent state.
#[derive(Debug)]
pub struct ForeignTreeStore {
    root: PathBuf,
}

impl ForeignTreeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn tree_dir(&self, job_id: Uuid) -> PathBuf {
        self.entry_dir(job_id).join("tree")
    }

    fn meta_path(&self, job_id: Uuid) -> PathBuf {
        self.entry_dir(job_id).join("entry.json")
    }

    async fn read_entry(&self, job_id: Uuid) -> Option<ForeignTreeCacheEntry> {
        let raw = tokio::fs::read(self.meta_path(job_id)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Corrupt tree cache metadata, ignoring");
                None
            }
        }
    }

    async fn write_entry(&self, job_id: Uuid, entry: &ForeignTreeCacheEntry) -> Result<()> {
        let meta = self.meta_path(job_id);
        let tmp = meta.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entry)?).await?;
        tokio::fs::rename(&tmp, &meta).await?;
        Ok(())
    }

    /// The last history position committed for this job, if any.
    pub async fn last_synced(&self, job_id: Uuid) -> Option<RevisionMarker> {
        self.read_entry(job_id).await.map(|e| e.last_synced)
    }

    /// Make the job's foreign tree current and return it.
    ///
    /// A cached tree gets an incremental update; if that fails (history
    /// rewritten upstream, interrupted prior fetch) the tree is wiped and
    /// checked out from scratch rather than left corrupt. A tree directory
    /// with no committed metadata is the debris of an interrupted first run
    /// and is likewise replaced.
    pub async fn prepare(
        &self,
        job_id: Uuid,
        converter: &dyn VcsConverter,
        url: &str,
    ) -> Result<TreeCheckout> {
        tokio::fs::create_dir_all(self.entry_dir(job_id)).await?;
        let tree = self.tree_dir(job_id);
        let entry = self.read_entry(job_id).await;

        if entry.is_some() && tree.exists() {
            match converter.update(url, &tree).await {
                Ok(marker) => {
                    return Ok(TreeCheckout {
                        path: tree,
                        previous_marker: entry.map(|e| e.last_synced),
                        current_marker: marker,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Incremental update failed, falling back to full checkout"
                    );
                    remove_tree(&tree).await?;
                }
            }
        } else if tree.exists() {
            remove_tree(&tree).await?;
        }

        let marker = converter.checkout(url, &tree).await?;
        Ok(TreeCheckout {
            path: tree,
            // After a fresh checkout the cached marker may describe history
            // that no longer exists; translate from scratch and let the
            // branch store skip what it already has.
            previous_marker: None,
            current_marker: marker,
        })
    }

    /// Record that everything up to `marker` has been published. Called once
    /// per successful run, after the branch store append.
    pub async fn commit(&self, job_id: Uuid, marker: &RevisionMarker) -> Result<()> {
        self.write_entry(
            job_id,
            &ForeignTreeCacheEntry {
                last_synced: marker.clone(),
                last_access: Utc::now(),
            },
        )
        .await
    }

    /// Drop cached trees for terminal jobs whose entry has not been touched
    /// within `retention`. Returns the number of entries removed.
    pub async fn evict<F>(&self, retention: Duration, is_terminal: F) -> Result<usize>
    where
        F: Fn(Uuid) -> bool,
    {
        if !self.root.exists() {
            return Ok(0);
        }
        // A retention too large for calendar arithmetic keeps everything.
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));

        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let Some(job_id) = item
                .file_name()
                .to_str()
                .and_then(|n| Uuid::parse_str(n).ok())
            else {
                continue;
            };
            if !is_terminal(job_id) {
                continue;
            }
            let stale = match self.read_entry(job_id).await {
                Some(entry) => cutoff.map_or(false, |c| entry.last_access < c),
                // No committed metadata: nothing worth keeping.
                None => true,
            };
            if stale {
                tracing::info!(job_id = %job_id, "Evicting foreign tree cache entry");
                tokio::fs::remove_dir_all(item.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn remove_tree(tree: &Path) -> Result<()> {
    if tree.exists() {
        tokio::fs::remove_dir_all(tree).await?;
    }
    Ok(())
}
