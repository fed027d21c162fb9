use thiserror::Error;

use crate::job::JobStatus;
use crate::services::ServiceError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Job {id} already failed: {error}")]
    AlreadyFailed { id: String, error: String },

    #[error("Job {0} is ready but its recipe is missing")]
    MissingRecipe(String),

    #[error("Invalid input: {0}")]
    InvalidInput(#[source] ServiceError),

    /// A stage's collaborator failed for good. `source` is the last error,
    /// unchanged.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: JobStatus,
        #[source]
        source: ServiceError,
    },

    /// Another run moved the job past the stage this run tried to enter.
    #[error("Job {id} is already at {current}, cannot enter {requested}")]
    Overtaken {
        id: String,
        current: JobStatus,
        requested: JobStatus,
    },

    #[error("{0} output missing from the run context")]
    MissingStageOutput(JobStatus),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }

    /// The stage a [`PipelineError::Stage`] came from.
    pub fn stage(&self) -> Option<JobStatus> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
