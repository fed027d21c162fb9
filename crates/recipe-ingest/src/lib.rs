//! Ingestion of social-media recipe posts.
//!
//! A submitted URL becomes a [`Job`] that the [`Pipeline`] drives through
//! scraping, media download, media upload and AI extraction into a stored
//! [`Recipe`]. Clients follow a job with the [`ProgressPoller`] and keep the
//! jobs they show in a bounded [`ProcessingQueue`].

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod recipe;
pub mod services;
pub mod store;
pub mod telemetry;

pub use client::{PollEvent, PollerConfig, ProcessingQueue, ProgressPoller, QueueItem};
pub use config::{load_config, Config};
pub use error::{ConfigError, IngestError, Result};
pub use job::{Job, JobSnapshot, JobStatus, JobUpdate, Metadata};
pub use pipeline::{ImportService, Pipeline, PipelineConfig, PipelineError, Services};
pub use recipe::{NewRecipe, Recipe, RecipeData};
pub use services::ServiceError;
pub use store::{JobChangeBroadcaster, JobStore, MemoryStore, RecipeStore, SqliteStore, StoreError};
pub use telemetry::{init_tracing, LogFormat};
