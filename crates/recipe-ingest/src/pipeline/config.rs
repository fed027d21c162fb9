use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::services::{
    FileApi, HttpMediaDownloader, ReadyPollingUploader, RecipeModel, SchemaExtractor,
    ServiceError,
};

use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_stage_attempts: u32,
    pub retry_base_delay: Duration,
    pub temp_dir: PathBuf,
    pub max_media_bytes: u64,
    pub upload_poll_interval: Duration,
    pub upload_timeout: Duration,
    pub extraction_attempts: u32,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let settings = &config.pipeline;
        Self {
            max_stage_attempts: settings.max_stage_attempts,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            temp_dir: settings.resolved_temp_dir(),
            max_media_bytes: settings.max_media_bytes,
            upload_poll_interval: Duration::from_millis(settings.upload_poll_interval_ms),
            upload_timeout: Duration::from_secs(settings.upload_timeout_secs),
            extraction_attempts: settings.extraction_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_stage_attempts, self.retry_base_delay)
    }

    /// Media downloader staging files under `temp_dir`.
    pub fn media_downloader(&self, client: reqwest::Client) -> HttpMediaDownloader {
        HttpMediaDownloader::new(client, self.temp_dir.clone(), self.max_media_bytes)
    }

    pub fn media_uploader<A: FileApi>(&self, api: A) -> ReadyPollingUploader<A> {
        ReadyPollingUploader::new(api, self.upload_poll_interval, self.upload_timeout)
    }

    pub fn recipe_extractor<M: RecipeModel>(
        &self,
        model: M,
    ) -> Result<SchemaExtractor<M>, ServiceError> {
        SchemaExtractor::new(model, self.extraction_attempts)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
