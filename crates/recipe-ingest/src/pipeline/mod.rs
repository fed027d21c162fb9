//! Server-side ingestion pipeline.
//!
//! A job moves through [`stage::PIPELINE_STAGES`] one stage at a time. Every
//! stage boundary is persisted, each stage's collaborator call is retried by
//! [`retry::run_stage`], and cancellation is detected by re-reading the job
//! from the store.

pub mod config;
pub mod context;
pub mod error;
pub mod retry;
pub mod runner;
pub mod service;
pub mod stage;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use retry::{run_stage, CancellationCheck, RetryPolicy};
pub use runner::{Pipeline, Services};
pub use service::{cancel_job, import_service, ImportService};
pub use stage::{transition, PIPELINE_STAGES};
