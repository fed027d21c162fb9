//! Bounded per-stage retry with cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::job::JobStatus;
use crate::services::ServiceError;
use crate::store::JobStore;

use super::error::PipelineError;

/// Attempt ceiling and linear backoff for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Re-reads a job to find out whether someone else has ended it.
pub struct CancellationCheck<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
}

impl<'a> CancellationCheck<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: &'a str) -> Self {
        Self { store, job_id }
    }

    /// Fails with [`PipelineError::Cancelled`] when the persisted job is
    /// terminal. A running pipeline never writes a terminal status itself
    /// before it stops, so any terminal status seen here was set externally.
    pub async fn ensure_active(&self) -> Result<(), PipelineError> {
        let job = self
            .store
            .get(self.job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(self.job_id.to_string()))?;

        if job.is_terminal() {
            return Err(PipelineError::Cancelled(self.job_id.to_string()));
        }
        Ok(())
    }
}

/// Runs one stage operation under `policy`.
///
/// Cancellation is checked before every attempt. Only retryable
/// [`ServiceError`]s are retried; the last error is returned unchanged inside
/// [`PipelineError::Stage`].
pub async fn run_stage<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationCheck<'_>,
    stage: JobStatus,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1u32;
    loop {
        cancel.ensure_active().await?;

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    return Err(PipelineError::Stage { stage, source: err });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed, retrying in {:?} (attempt {}/{}): {}",
                    stage, delay, attempt, policy.max_attempts, err
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobUpdate};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    async fn store_with_job() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let job = JobStore::create(&store, Job::new("https://example.com/p/1"))
            .await
            .unwrap();
        (store, job.id)
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_attempts() {
        let (store, id) = store_with_job().await;
        let cancel = CancellationCheck::new(&store, &id);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = run_stage(
            &RetryPolicy::default(),
            &cancel,
            JobStatus::DownloadingMedia,
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient("cdn hiccup".to_string()))
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 500ms after the first failure, 1000ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        match result {
            Err(PipelineError::Stage { stage, source }) => {
                assert_eq!(stage, JobStatus::DownloadingMedia);
                assert!(matches!(source, ServiceError::Transient(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let (store, id) = store_with_job().await;
        let cancel = CancellationCheck::new(&store, &id);
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = run_stage(
            &RetryPolicy::default(),
            &cancel,
            JobStatus::Scraping,
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Unavailable("private account".to_string()))
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().stage(), Some(JobStatus::Scraping));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failure() {
        let (store, id) = store_with_job().await;
        let cancel = CancellationCheck::new(&store, &id);

        let value = run_stage(
            &RetryPolicy::default(),
            &cancel,
            JobStatus::Scraping,
            |attempt| async move {
                if attempt < 2 {
                    Err(ServiceError::RateLimited("slow down".to_string()))
                } else {
                    Ok(attempt)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let (store, id) = store_with_job().await;
        let cancel = CancellationCheck::new(&store, &id);
        let calls = &AtomicU32::new(0);
        let (store_ref, id_ref) = (&store, id.as_str());

        let result: Result<(), _> = run_stage(
            &RetryPolicy::default(),
            &cancel,
            JobStatus::UploadingMedia,
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                store_ref
                    .update(
                        id_ref,
                        JobUpdate::status(JobStatus::Failed).with_error("cancelled"),
                    )
                    .await
                    .unwrap();
                Err(ServiceError::Timeout("upload".to_string()))
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = MemoryStore::new();
        let cancel = CancellationCheck::new(&store, "ghost");
        let err = cancel.ensure_active().await.unwrap_err();
        assert!(matches!(err, PipelineError::JobNotFound(id) if id == "ghost"));
    }
}
