use std::path::PathBuf;

use tracing::{debug, warn};

use crate::job::{Job, JobStatus, Metadata};
use crate::recipe::RecipeData;
use crate::services::{DownloadedMedia, FileRef, MediaRef, RawPost};

/// Driver-local state of one pipeline run. Nothing in here is persisted
/// except what the runner copies into job metadata.
pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub input_url: String,

    // Stage currently running, or the last one entered
    pub stage: JobStatus,

    // Status the job had when this run picked it up
    pub resume_from: JobStatus,

    // Scraping result
    pub post: Option<RawPost>,
    pub hashtags: Vec<String>,

    // Downloading result
    pub media_ref: Option<MediaRef>,
    pub media: Option<DownloadedMedia>,

    // Uploading result
    pub file: Option<FileRef>,

    // Extracting result
    pub recipe_data: Option<RecipeData>,

    // Facts produced by a stage, written with the next transition
    pub pending_metadata: Metadata,

    // Local files this run created and must delete before returning
    pub temp_files: Vec<PathBuf>,
}

impl PipelineContext {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            input_url: job.input_url.clone(),
            stage: job.status,
            resume_from: job.status,
            post: None,
            hashtags: Vec::new(),
            media_ref: None,
            media: None,
            file: None,
            recipe_data: None,
            pending_metadata: Metadata::new(),
            temp_files: Vec::new(),
        }
    }

    /// Records a fact to be merged into job metadata at the next transition.
    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.pending_metadata.insert(key.to_string(), value.into());
    }

    pub fn take_pending_metadata(&mut self) -> Metadata {
        std::mem::take(&mut self.pending_metadata)
    }

    pub fn track_temp_file(&mut self, path: PathBuf) {
        self.temp_files.push(path);
    }

    /// Deletes every tracked temp file. Failures are logged and otherwise
    /// ignored.
    pub async fn cleanup(&mut self) {
        for path in self.temp_files.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed temp file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for PipelineContext {
    // Covers runs whose future was dropped before `cleanup` was reached.
    fn drop(&mut self) {
        for path in self.temp_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove temp file {}: {}", path.display(), e);
                }
            }
        }
    }
}
