//! SQLite-backed job and recipe store.
//!
//! Each update is a read-modify-write inside one transaction, so metadata
//! merges never lose concurrent keys. Calls run synchronously on the caller.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::{rejected_update, JobChangeBroadcaster, JobStore, RecipeStore, StoreError};
use crate::db::job_repo::{self, JobRow};
use crate::db::recipe_repo::{self, RecipeRow};
use crate::db::Database;
use crate::job::{Job, JobStatus, JobUpdate, Metadata};
use crate::recipe::{NewRecipe, Recipe};

pub struct SqliteStore {
    db: Database,
    changes: JobChangeBroadcaster,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            changes: JobChangeBroadcaster::default(),
        }
    }

    /// Opens the database file at `path`, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn job_to_row(job: &Job) -> Result<JobRow, StoreError> {
    Ok(JobRow {
        id: job.id.clone(),
        input_url: job.input_url.clone(),
        status: job.status.as_str().to_string(),
        progress: i64::from(job.progress),
        recipe_id: job.recipe_id.clone(),
        error: job.error.clone(),
        metadata: serde_json::to_string(&job.metadata)?,
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
    })
}

fn row_to_job(row: JobRow) -> Result<Job, StoreError> {
    let status: JobStatus = row.status.parse().map_err(|e| StoreError::Corrupt {
        id: row.id.clone(),
        reason: format!("{}", e),
    })?;
    let metadata: Metadata = serde_json::from_str(&row.metadata)?;
    let created_at = parse_timestamp(&row.created_at, &row.id)?;
    let updated_at = parse_timestamp(&row.updated_at, &row.id)?;

    Ok(Job {
        id: row.id,
        input_url: row.input_url,
        status,
        // Re-derived rather than trusted from the column.
        progress: status.progress(),
        recipe_id: row.recipe_id,
        error: row.error,
        metadata,
        created_at,
        updated_at,
    })
}

fn recipe_to_row(recipe: &Recipe) -> Result<RecipeRow, StoreError> {
    Ok(RecipeRow {
        id: recipe.id.clone(),
        job_id: recipe.fields.job_id.clone(),
        source_url: recipe.fields.source_url.clone(),
        caption: recipe.fields.caption.clone(),
        owner_username: recipe.fields.owner_username.clone(),
        media_url: recipe.fields.media_url.clone(),
        hashtags: serde_json::to_string(&recipe.fields.hashtags)?,
        data: serde_json::to_string(&recipe.fields.data)?,
        created_at: format_timestamp(recipe.created_at),
    })
}

fn row_to_recipe(row: RecipeRow) -> Result<Recipe, StoreError> {
    let created_at = parse_timestamp(&row.created_at, &row.id)?;
    Ok(Recipe {
        id: row.id,
        fields: NewRecipe {
            job_id: row.job_id,
            source_url: row.source_url,
            caption: row.caption,
            owner_username: row.owner_username,
            media_url: row.media_url,
            hashtags: serde_json::from_str(&row.hashtags)?,
            data: serde_json::from_str(&row.data)?,
        },
        created_at,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        let row = job_to_row(&job)?;
        self.db.with_conn(|conn| job_repo::insert(conn, &row))?;
        self.changes.send(job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = self.db.with_conn(|conn| job_repo::find_by_id(conn, id))?;
        row.map(row_to_job).transpose()
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let updated = self.db.with_transaction(|tx| {
            let row = job_repo::find_by_id(tx, id)?
                .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
            let mut job = row_to_job(row)?;
            job.apply(&update).map_err(|e| rejected_update(id, e))?;
            job_repo::update(tx, &job_to_row(&job)?)?;
            Ok::<_, StoreError>(job)
        })?;
        self.changes.send(updated.clone());
        Ok(updated)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| job_repo::find_by_status(conn, status.as_str()))?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn find_by_url(&self, input_url: &str) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| job_repo::find_by_url(conn, input_url))?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn find_or_create(&self, job: Job) -> Result<Job, StoreError> {
        let (job, created) = self.db.with_transaction(|tx| {
            for row in job_repo::find_by_url(tx, &job.input_url)? {
                let existing = row_to_job(row)?;
                if existing.status != JobStatus::Failed {
                    return Ok::<_, StoreError>((existing, false));
                }
            }
            job_repo::insert(tx, &job_to_row(&job)?)?;
            Ok((job, true))
        })?;
        if created {
            self.changes.send(job.clone());
        }
        Ok(job)
    }

    fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.changes.subscribe()
    }

    fn changes(&self) -> JobChangeBroadcaster {
        self.changes.clone()
    }
}

#[async_trait]
impl RecipeStore for SqliteStore {
    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, StoreError> {
        let recipe = Recipe::from_new(recipe);
        let row = recipe_to_row(&recipe)?;
        self.db
            .with_conn(|conn| recipe_repo::insert(conn, &row))?;
        Ok(recipe)
    }

    async fn get(&self, id: &str) -> Result<Option<Recipe>, StoreError> {
        let row = self
            .db
            .with_conn(|conn| recipe_repo::find_by_id(conn, id))?;
        row.map(row_to_recipe).transpose()
    }
}
