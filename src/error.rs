use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::job::FailureCategory;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("An active import already targets branch {0}")]
    DuplicateJob(String),

    #[error("Job {job_id} is not owned by machine {machine}")]
    NotOwner { job_id: Uuid, machine: String },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Source repository unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Import aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ImportError {
    /// Classify this error for the structured outcome reported back to the
    /// job store. Pipeline-internal errors never cross the worker boundary
    /// unclassified.
    pub fn category(&self) -> FailureCategory {
        match self {
            ImportError::SourceUnavailable(_) => FailureCategory::SourceUnavailable,
            ImportError::Conversion(_) => FailureCategory::Conversion,
            ImportError::Publish(_) => FailureCategory::Publish,
            ImportError::Aborted(_) => FailureCategory::Aborted,
            _ => FailureCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
