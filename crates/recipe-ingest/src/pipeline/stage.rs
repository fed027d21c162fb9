//! Stage transitions.
//!
//! A transition sets `status` (and with it `stage` and `progress`) and merges
//! a metadata patch, in one store update. Sequencing lives in the runner.

use chrono::Utc;
use tracing::debug;

use crate::job::{Job, JobStatus, JobUpdate, Metadata};
use crate::store::{JobStore, StoreError};

/// Working stages, in the order the runner executes them.
pub const PIPELINE_STAGES: [JobStatus; 4] = [
    JobStatus::Scraping,
    JobStatus::DownloadingMedia,
    JobStatus::UploadingMedia,
    JobStatus::Extracting,
];

/// Metadata key holding the time the job last entered a stage.
pub const STAGE_STARTED_AT_KEY: &str = "stage_started_at";

/// Moves a job to `status`, merging `patch` into its metadata.
///
/// Entering a working stage clears any previous error. The store refuses
/// moves off the stage ladder with [`StoreError::IllegalTransition`].
pub async fn transition(
    store: &dyn JobStore,
    job_id: &str,
    status: JobStatus,
    patch: Metadata,
) -> Result<Job, StoreError> {
    let mut update = JobUpdate::status(status).merge_metadata(patch);
    if !status.is_terminal() {
        update = update.clear_error();
    }
    let job = store.update(job_id, update).await?;
    debug!(job_id, status = %job.status, progress = job.progress, "Stage transition");
    Ok(job)
}

/// Metadata written when a stage starts.
pub fn stage_started_patch() -> Metadata {
    let mut patch = Metadata::new();
    patch.insert(
        STAGE_STARTED_AT_KEY.to_string(),
        Utc::now().to_rfc3339().into(),
    );
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_stages_follow_the_ladder() {
        let mut previous = JobStatus::Queued;
        for stage in PIPELINE_STAGES {
            assert!(previous.can_transition_to(stage), "{} -> {}", previous, stage);
            previous = stage;
        }
        assert!(previous.can_transition_to(JobStatus::Ready));
    }

    #[tokio::test]
    async fn test_transition_merges_metadata() {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();

        let mut first = Metadata::new();
        first.insert("media_type".to_string(), json!("video"));
        transition(&store, &job.id, JobStatus::Scraping, first)
            .await
            .unwrap();

        let updated = transition(
            &store,
            &job.id,
            JobStatus::DownloadingMedia,
            stage_started_patch(),
        )
        .await
        .unwrap();

        assert_eq!(updated.status, JobStatus::DownloadingMedia);
        assert_eq!(updated.progress, 35);
        assert_eq!(updated.metadata.get("media_type"), Some(&json!("video")));
        assert!(updated.metadata.contains_key(STAGE_STARTED_AT_KEY));
        assert_eq!(updated.snapshot().stage, updated.status);
    }

    #[tokio::test]
    async fn test_transition_out_of_terminal_is_rejected() {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();
        transition(&store, &job.id, JobStatus::Failed, Metadata::new())
            .await
            .unwrap();

        let err = transition(&store, &job.id, JobStatus::Scraping, Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalJob { .. }));
    }

    #[tokio::test]
    async fn test_backward_transition_is_rejected() {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();
        transition(&store, &job.id, JobStatus::Scraping, Metadata::new())
            .await
            .unwrap();
        transition(&store, &job.id, JobStatus::DownloadingMedia, Metadata::new())
            .await
            .unwrap();

        let err = transition(&store, &job.id, JobStatus::Scraping, Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition {
                current: JobStatus::DownloadingMedia,
                requested: JobStatus::Scraping,
                ..
            }
        ));

        let skip = transition(&store, &job.id, JobStatus::Extracting, Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(skip, StoreError::IllegalTransition { .. }));

        let stored = JobStore::get(&store, &job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::DownloadingMedia);
    }
}
