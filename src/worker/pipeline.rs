use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::scheduler::job::{CodeImportSourceDetails, ImportOutcome};
use crate::store::{BranchStore, ForeignTreeStore};
use crate::vcs::ConverterRegistry;

/// Executes one job's conversion end-to-end: acquire the foreign tree,
/// translate its history, publish to the hosted branch.
///
/// Stages run sequentially with a cancellation check between each; a
/// reclaimed or shut-down run aborts at the next checkpoint and leaves both
/// caches in their last consistent state. Stage errors are classified into
/// the failure taxonomy before they reach the outcome.
pub struct ImportWorker {
    trees: Arc<ForeignTreeStore>,
    branches: Arc<BranchStore>,
    converters: ConverterRegistry,
}

impl ImportWorker {
    pub fn new(trees: Arc<ForeignTreeStore>, branches: Arc<BranchStore>) -> Self {
        Self::with_converters(trees, branches, ConverterRegistry::default())
    }

    pub fn with_converters(
        trees: Arc<ForeignTreeStore>,
        branches: Arc<BranchStore>,
        converters: ConverterRegistry,
    ) -> Self {
        Self {
            trees,
            branches,
            converters,
        }
    }

    /// Run the pipeline for one assigned job. Never panics or leaks an
    /// unclassified error; the returned outcome is what gets reported to
    /// the job store.
    pub async fn run(
        &self,
        job_id: Uuid,
        source: &CodeImportSourceDetails,
        cancel: &CancellationToken,
    ) -> ImportOutcome {
        tracing::info!(
            job_id = %job_id,
            kind = %source.repository_type,
            url = %source.source_url,
            target = %source.target_branch_id,
            "Starting import run"
        );

        match self.run_pipeline(job_id, source, cancel).await {
            Ok(appended) => {
                tracing::info!(job_id = %job_id, revisions = appended, "Import run complete");
                append_log(
                    &source.log_destination,
                    &format!("import complete: {} new revision(s)\n", appended),
                )
                .await;
                ImportOutcome::success(appended)
            }
            Err(e) => {
                let category = e.category();
                tracing::warn!(job_id = %job_id, category = %category, error = %e, "Import run failed");
                append_log(&source.log_destination, &format!("import failed: {}\n", e)).await;
                ImportOutcome::failure(category, e.to_string())
            }
        }
    }

    async fn run_pipeline(
        &self,
        job_id: Uuid,
        source: &CodeImportSourceDetails,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let converter = self
            .converters
            .converter_for(source.repository_type)
            .ok_or_else(|| {
                ImportError::Conversion(format!(
                    "no converter registered for {}",
                    source.repository_type
                ))
            })?;

        checkpoint(cancel, "before fetch")?;
        append_log(
            &source.log_destination,
            &format!("fetching {}\n", source.source_url),
        )
        .await;
        let checkout = self
            .trees
            .prepare(job_id, converter.as_ref(), &source.source_url)
            .await?;

        checkpoint(cancel, "before conversion")?;
        let revisions = converter
            .translate(&checkout.path, checkout.previous_marker.as_ref())
            .await?;
        append_log(
            &source.log_destination,
            &format!("converted {} revision(s)\n", revisions.len()),
        )
        .await;

        checkpoint(cancel, "before publish")?;
        let (_handle, appended) = self
            .branches
            .append_revisions(&source.target_branch_id, &revisions)
            .await?;

        // The tree cache marker only advances once the revisions are safely
        // on the branch; a crash before this point replays cleanly.
        self.trees.commit(job_id, &checkout.current_marker).await?;
        Ok(appended)
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ImportError::Aborted(format!("cancelled {}", stage)))
    } else {
        Ok(())
    }
}

/// Append a progress line to the job's log sink, if it has one. The sink is
/// best-effort; a logging failure never fails the run.
async fn append_log(destination: &Option<PathBuf>, line: &str) {
    let Some(path) = destination else { return };
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Can't append to job log");
    }
}
