//! Job and recipe stores.
//!
//! The job store is the single source of truth for pipeline state. Every
//! created or updated job is also published on the store's change feed, which
//! the client-side queue uses for realtime updates.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::db::DatabaseError;
use crate::job::{Job, JobStatus, JobUpdate, RejectedUpdate};
use crate::recipe::{NewRecipe, Recipe};

pub mod changes;
pub mod memory;
pub mod sqlite;

pub use changes::JobChangeBroadcaster;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} is already {current} and cannot move to {requested}")]
    TerminalJob {
        id: String,
        current: JobStatus,
        requested: JobStatus,
    },

    #[error("Job {id} cannot move from {current} to {requested}")]
    IllegalTransition {
        id: String,
        current: JobStatus,
        requested: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to encode or decode stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistent job records with read-after-write consistency.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job as given.
    async fn create(&self, job: Job) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Applies a partial update and returns the resulting job.
    ///
    /// Metadata is merged key by key into the existing bag. Any update to a
    /// `ready` or `failed` job fails with [`StoreError::TerminalJob`]; a status
    /// change off the stage ladder fails with [`StoreError::IllegalTransition`].
    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError>;

    /// Jobs with the given status, oldest first.
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Jobs created for `input_url`, newest first.
    async fn find_by_url(&self, input_url: &str) -> Result<Vec<Job>, StoreError>;

    /// Returns the newest job for `job.input_url` that has not failed, or
    /// persists `job` when there is none.
    ///
    /// The lookup and the insert are one atomic step, so concurrent callers
    /// with the same URL end up sharing a single job.
    async fn find_or_create(&self, job: Job) -> Result<Job, StoreError>;

    /// Subscribes to every subsequent job change.
    fn subscribe(&self) -> broadcast::Receiver<Job>;

    /// The change feed itself, for consumers that attach listeners later.
    fn changes(&self) -> JobChangeBroadcaster;
}

/// Persistent recipe records.
#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Recipe>, StoreError>;
}

/// Maps an update refused by [`crate::job::Job::apply`] onto a store error for
/// job `id`.
pub(crate) fn rejected_update(id: &str, rejected: RejectedUpdate) -> StoreError {
    match rejected {
        RejectedUpdate::Terminal { current, requested } => StoreError::TerminalJob {
            id: id.to_string(),
            current,
            requested,
        },
        RejectedUpdate::OutOfOrder { current, requested } => StoreError::IllegalTransition {
            id: id.to_string(),
            current,
            requested,
        },
    }
}
