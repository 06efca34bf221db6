use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Foreign version-control system a job imports from. Closed set; the
/// conversion capability is resolved from this tag via a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Cvs,
    Subversion,
    Git,
    Bazaar,
}

impl std::fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryType::Cvs => write!(f, "cvs"),
            RepositoryType::Subversion => write!(f, "subversion"),
            RepositoryType::Git => write!(f, "git"),
            RepositoryType::Bazaar => write!(f, "bazaar"),
        }
    }
}

impl FromStr for RepositoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cvs" => Ok(RepositoryType::Cvs),
            "svn" | "subversion" => Ok(RepositoryType::Subversion),
            "git" => Ok(RepositoryType::Git),
            "bzr" | "bazaar" => Ok(RepositoryType::Bazaar),
            other => Err(format!("unknown repository type: {}", other)),
        }
    }
}

/// Immutable description of one conversion task. Never mutated after the job
/// is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeImportSourceDetails {
    pub repository_type: RepositoryType,
    pub source_url: String,
    pub target_branch_id: String,
    /// Where worker progress output is appended, if anywhere. Write-only;
    /// no format contract beyond "append text".
    #[serde(default)]
    pub log_destination: Option<PathBuf>,
}

impl CodeImportSourceDetails {
    /// Deterministic job id derived from the target branch. Direct
    /// invocations use this so repeated runs against the same target share
    /// one foreign tree cache entry and get incremental updates.
    pub fn stable_job_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, self.target_branch_id.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
    Reclaimed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Assigned => write!(f, "assigned"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Reclaimed => write!(f, "reclaimed"),
        }
    }
}

/// Failure classification reported with a job outcome. Internal pipeline
/// errors are folded into one of these before reaching the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The foreign repository could not be reached or read. Transient;
    /// retried with backoff up to the attempt cap.
    SourceUnavailable,
    /// The foreign history could not be translated. Likely reproduces
    /// identically, so flagged for operator visibility on first occurrence.
    Conversion,
    /// The converted revisions could not be appended to the hosted branch.
    /// May be transient; retried.
    Publish,
    /// The run was cancelled (reclaim, shutdown) before completing.
    Aborted,
    /// Unclassified worker-side failure (I/O, cache metadata).
    Internal,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::SourceUnavailable => write!(f, "source-unavailable"),
            FailureCategory::Conversion => write!(f, "conversion"),
            FailureCategory::Publish => write!(f, "publish"),
            FailureCategory::Aborted => write!(f, "aborted"),
            FailureCategory::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub category: FailureCategory,
    pub message: String,
}

/// Structured result of one import run, reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub revisions_imported: usize,
    pub error_detail: Option<FailureDetail>,
}

impl ImportOutcome {
    pub fn success(revisions_imported: usize) -> Self {
        Self {
            success: true,
            revisions_imported,
            error_detail: None,
        }
    }

    pub fn failure(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            revisions_imported: 0,
            error_detail: Some(FailureDetail {
                category,
                message: message.into(),
            }),
        }
    }
}

/// One converted revision in the target format. Identity is `id`; the branch
/// store deduplicates on it, never on position or count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One unit of "convert foreign repository X into hosted branch Y".
///
/// At most one machine holds a job in `Assigned`/`Running` state at a time,
/// and `attempt_count` only ever increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeImportJob {
    pub id: Uuid,
    pub source: CodeImportSourceDetails,
    pub state: JobState,
    pub assigned_machine: Option<String>,
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<ImportOutcome>,
}

impl CodeImportJob {
    pub fn new(source: CodeImportSourceDetails) -> Self {
        Self::with_id(Uuid::new_v4(), source)
    }

    pub fn with_id(id: Uuid, source: CodeImportSourceDetails) -> Self {
        Self {
            id,
            source,
            state: JobState::Pending,
            assigned_machine: None,
            attempt_count: 0,
            enqueued_at: Utc::now(),
            assigned_at: None,
            last_heartbeat_at: None,
            last_run_at: None,
            last_result: None,
        }
    }

    /// Terminal jobs are never offered again and block nothing: a new import
    /// for the same target branch may be registered once this is true.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Succeeded | JobState::Failed)
    }

    pub fn is_owned_by(&self, machine: &str) -> bool {
        self.assigned_machine.as_deref() == Some(machine)
    }
}
