//! Upload to the AI service's file store, then wait for the file to become
//! usable.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{FileRef, MediaUploader, ServiceError};

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

/// Raw file-store operations of the AI service.
#[async_trait]
pub trait FileApi: Send + Sync {
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<FileRef, ServiceError>;

    async fn file_state(&self, file: &FileRef) -> Result<FileState, ServiceError>;
}

/// [`MediaUploader`] that polls the file state after uploading until it is
/// `Active`, it is `Failed`, or `timeout` runs out.
pub struct ReadyPollingUploader<A> {
    api: A,
    poll_interval: Duration,
    timeout: Duration,
}

impl<A: FileApi> ReadyPollingUploader<A> {
    pub fn new(api: A, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            api,
            poll_interval,
            timeout,
        }
    }
}

#[async_trait]
impl<A: FileApi> MediaUploader for ReadyPollingUploader<A> {
    async fn upload(&self, path: &Path, mime_type: &str) -> Result<FileRef, ServiceError> {
        let file = self.api.upload_file(path, mime_type).await?;
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.api.file_state(&file).await? {
                FileState::Active => return Ok(file),
                FileState::Failed => {
                    return Err(ServiceError::Transient(format!(
                        "remote processing of {} failed",
                        file.name
                    )))
                }
                FileState::Processing => {
                    debug!("File {} still processing", file.name);
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ServiceError::Timeout(format!(
                    "{} not ready after {:?}",
                    file.name, self.timeout
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}
