//! Entry points used by the surrounding application.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::job::{Job, JobStatus, JobUpdate, CANCELLED_MESSAGE, CANCELLED_METADATA_KEY};
use crate::recipe::Recipe;
use crate::services::normalize_url;
use crate::store::{JobStore, StoreError};

use super::error::PipelineError;
use super::runner::Pipeline;

/// Submits, runs and cancels imports.
#[derive(Clone)]
pub struct ImportService {
    pipeline: Pipeline,
}

impl ImportService {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    fn jobs(&self) -> &dyn JobStore {
        self.pipeline.jobs().as_ref()
    }

    /// Creates a queued job for `url`.
    ///
    /// Returns the existing job instead when one for the same normalized URL
    /// is queued, running or ready.
    pub async fn submit(&self, url: &str) -> Result<Job, PipelineError> {
        let url = normalize_url(url).map_err(PipelineError::InvalidInput)?;

        let candidate = Job::new(url);
        let candidate_id = candidate.id.clone();
        let job = self.jobs().find_or_create(candidate).await?;
        if job.id == candidate_id {
            info!(job_id = %job.id, url = %job.input_url, "Job queued");
        } else {
            debug!(job_id = %job.id, "Reusing existing job for {}", job.input_url);
        }
        Ok(job)
    }

    pub async fn run(&self, job_id: &str) -> Result<Recipe, PipelineError> {
        self.pipeline.run(job_id).await
    }

    /// Runs the job on its own task.
    pub fn spawn(&self, job_id: impl Into<String>) -> JoinHandle<Result<Recipe, PipelineError>> {
        let pipeline = self.pipeline.clone();
        let job_id = job_id.into();
        tokio::spawn(async move { pipeline.run(&job_id).await })
    }

    pub async fn cancel(&self, job_id: &str) -> Result<Job, PipelineError> {
        cancel_job(self.jobs(), job_id).await
    }
}

/// Writes the cancellation marker on a job that is still in progress.
///
/// Terminal jobs are returned unchanged.
pub async fn cancel_job(store: &dyn JobStore, job_id: &str) -> Result<Job, PipelineError> {
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
    if job.is_terminal() {
        return Ok(job);
    }

    let update = JobUpdate::status(JobStatus::Failed)
        .with_error(CANCELLED_MESSAGE)
        .with_metadata(CANCELLED_METADATA_KEY, true);
    match store.update(job_id, update).await {
        Ok(job) => {
            info!(job_id, "Job cancelled");
            Ok(job)
        }
        // Finished concurrently; report whatever it ended as.
        Err(StoreError::TerminalJob { .. }) => store
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Wires an [`ImportService`] over one store that holds both jobs and recipes.
pub fn import_service<S>(
    config: Arc<super::PipelineConfig>,
    store: Arc<S>,
    services: super::Services,
) -> ImportService
where
    S: JobStore + crate::store::RecipeStore + 'static,
{
    ImportService::new(Pipeline::new(config, store.clone(), store, services))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_cancel_marks_sentinel() {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();

        let cancelled = cancel_job(&store, &job.id).await.unwrap();

        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(cancelled.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();
        store
            .update(&job.id, JobUpdate::status(JobStatus::Failed).with_error("boom"))
            .await
            .unwrap();

        let after = cancel_job(&store, &job.id).await.unwrap();

        assert_eq!(after.error.as_deref(), Some("boom"));
        assert!(!after.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let store = MemoryStore::new();
        assert!(matches!(
            cancel_job(&store, "nope").await,
            Err(PipelineError::JobNotFound(_))
        ));
    }
}
