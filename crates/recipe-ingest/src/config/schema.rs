use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_stage_attempts")]
    pub max_stage_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_upload_poll_interval_ms")]
    pub upload_poll_interval_ms: u64,
    #[serde(default = "default_extraction_attempts")]
    pub extraction_attempts: u32,
    /// Where downloaded media is staged. Defaults to the OS temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_max_stage_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_max_media_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_upload_poll_interval_ms() -> u64 {
    2000
}

fn default_extraction_attempts() -> u32 {
    3
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_stage_attempts: default_max_stage_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_media_bytes: default_max_media_bytes(),
            upload_timeout_secs: default_upload_timeout_secs(),
            upload_poll_interval_ms: default_upload_poll_interval_ms(),
            extraction_attempts: default_extraction_attempts(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_no_progress_timeout_ms")]
    pub no_progress_timeout_ms: u64,
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_no_progress_timeout_ms() -> u64 {
    60_000
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff_factor: default_backoff_factor(),
            no_progress_timeout_ms: default_no_progress_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    3
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data dir>/recipe-ingest/ingest.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(crate::db::default_database_path)
    }
}

impl PipelineSettings {
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
