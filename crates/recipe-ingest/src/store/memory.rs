//! In-memory job and recipe store.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{rejected_update, JobChangeBroadcaster, JobStore, RecipeStore, StoreError};
use crate::job::{Job, JobStatus, JobUpdate};
use crate::recipe::{NewRecipe, Recipe};

/// Process-local store. Reads always observe the latest write.
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    recipes: RwLock<HashMap<String, Recipe>>,
    changes: JobChangeBroadcaster,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_changes(JobChangeBroadcaster::default())
    }

    pub fn with_changes(changes: JobChangeBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            recipes: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Number of recipes stored so far.
    pub fn recipe_count(&self) -> usize {
        read(&self.recipes).len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("Memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("Memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        write(&self.jobs).insert(job.id.clone(), job.clone());
        self.changes.send(job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(read(&self.jobs).get(id).cloned())
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let updated = {
            let mut jobs = write(&self.jobs);
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
            job.apply(&update).map_err(|e| rejected_update(id, e))?;
            job.clone()
        };
        self.changes.send(updated.clone());
        Ok(updated)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = read(&self.jobs)
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn find_by_url(&self, input_url: &str) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = read(&self.jobs)
            .values()
            .filter(|job| job.input_url == input_url)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_or_create(&self, job: Job) -> Result<Job, StoreError> {
        {
            let mut jobs = write(&self.jobs);
            let existing = jobs
                .values()
                .filter(|j| j.input_url == job.input_url && j.status != JobStatus::Failed)
                .max_by_key(|j| j.created_at);
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
            jobs.insert(job.id.clone(), job.clone());
        }
        self.changes.send(job.clone());
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
impl RecipeStore for MemoryStore {
    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, StoreError> {
        let recipe = Recipe::from_new(recipe);
        write(&self.recipes).insert(recipe.id.clone(), recipe.clone());
        Ok(recipe)
    }

    async fn get(&self, id: &str) -> Result<Option<Recipe>, StoreError> {
        Ok(read(&self.recipes).get(id).cloned())
    }
}
