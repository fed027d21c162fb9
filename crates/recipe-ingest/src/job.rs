//! Job model: the persisted unit of ingestion work.
//!
//! A job's `status` doubles as its pipeline stage and fully determines its
//! `progress` percentage. Metadata is an open bag of stage-scoped facts that is
//! only ever merged into, never replaced.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error message and metadata flag written when a job is cancelled externally.
pub const CANCELLED_MESSAGE: &str = "cancelled";
pub const CANCELLED_METADATA_KEY: &str = "cancelled";

/// Open key/value bag of diagnostic facts attached to a job.
pub type Metadata = serde_json::Map<String, Value>;

/// Status (and stage) of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scraping,
    DownloadingMedia,
    UploadingMedia,
    Extracting,
    Ready,
    Failed,
}

impl JobStatus {
    /// All statuses, in pipeline order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Scraping,
        JobStatus::DownloadingMedia,
        JobStatus::UploadingMedia,
        JobStatus::Extracting,
        JobStatus::Ready,
        JobStatus::Failed,
    ];

    /// Progress percentage shown for this status.
    pub fn progress(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Scraping => 15,
            JobStatus::DownloadingMedia => 35,
            JobStatus::UploadingMedia => 55,
            JobStatus::Extracting => 80,
            JobStatus::Ready | JobStatus::Failed => 100,
        }
    }

    /// Returns true for `ready` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scraping => "scraping",
            JobStatus::DownloadingMedia => "downloading_media",
            JobStatus::UploadingMedia => "uploading_media",
            JobStatus::Extracting => "extracting",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }

    /// The stage that legally follows this one on the happy path.
    pub fn next(self) -> Option<JobStatus> {
        match self {
            JobStatus::Queued => Some(JobStatus::Scraping),
            JobStatus::Scraping => Some(JobStatus::DownloadingMedia),
            JobStatus::DownloadingMedia => Some(JobStatus::UploadingMedia),
            JobStatus::UploadingMedia => Some(JobStatus::Extracting),
            JobStatus::Extracting => Some(JobStatus::Ready),
            JobStatus::Ready | JobStatus::Failed => None,
        }
    }

    /// Whether `self -> next` is an edge of the stage ladder.
    ///
    /// `failed` is reachable from every non-terminal status; nothing leaves a
    /// terminal status.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || self.next() == Some(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A persisted import job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Source URL; never changes after creation.
    pub input_url: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a queued job for `input_url` with a fresh id.
    pub fn new(input_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input_url: input_url.into(),
            status: JobStatus::Queued,
            progress: JobStatus::Queued.progress(),
            recipe_id: None,
            error: None,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when an external actor has cancelled this job.
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed
            && (self.error.as_deref() == Some(CANCELLED_MESSAGE)
                || self.metadata.get(CANCELLED_METADATA_KEY) == Some(&Value::Bool(true)))
    }

    /// Applies a partial update in place.
    ///
    /// A terminal job accepts no update at all. Otherwise a status change must
    /// follow [`JobStatus::can_transition_to`]; writing the current status
    /// again is allowed. Rejected updates leave the job untouched. Progress is
    /// always re-derived from the resulting status.
    pub fn apply(&mut self, update: &JobUpdate) -> Result<(), RejectedUpdate> {
        let requested = update.status.unwrap_or(self.status);
        if self.status.is_terminal() {
            return Err(RejectedUpdate::Terminal {
                current: self.status,
                requested,
            });
        }
        if requested != self.status && !self.status.can_transition_to(requested) {
            return Err(RejectedUpdate::OutOfOrder {
                current: self.status,
                requested,
            });
        }

        self.status = requested;
        self.progress = self.status.progress();

        if let Some(ref error) = update.error {
            self.error = error.clone();
        }
        if let Some(ref recipe_id) = update.recipe_id {
            self.recipe_id = Some(recipe_id.clone());
        }
        for (key, value) in &update.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The fields the presentation layer depends on.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            stage: self.status,
            progress: self.progress,
            error: self.error.clone(),
            recipe_id: self.recipe_id.clone(),
        }
    }
}

/// Why [`Job::apply`] refused an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedUpdate {
    /// The job is already `ready` or `failed`.
    Terminal {
        current: JobStatus,
        requested: JobStatus,
    },
    /// The requested status is not the next rung of the ladder.
    OutOfOrder {
        current: JobStatus,
        requested: JobStatus,
    },
}

/// Public projection of a job: `{status, stage, progress, error, recipeId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Always equal to `status`.
    pub stage: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
}

/// Partial update of a job.
///
/// `error` uses a nested option: `None` leaves the field alone,
/// `Some(None)` clears it and `Some(Some(msg))` sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub error: Option<Option<String>>,
    pub recipe_id: Option<String>,
    pub metadata: Metadata,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn with_recipe(mut self, recipe_id: impl Into<String>) -> Self {
        self.recipe_id = Some(recipe_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn merge_metadata(mut self, patch: Metadata) -> Self {
        self.metadata.extend(patch);
        self
    }
}
