//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct wires a complete import service for testing:
//! - An in-memory store for jobs and recipes
//! - A temporary media directory the fake downloader writes into
//! - Scripted fakes for scraping, download, upload and extraction

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use recipe_ingest::pipeline::{import_service, ImportService, PipelineConfig, Services};
use recipe_ingest::{Job, JobStore, MemoryStore};

use super::fakes::{FakeDownloader, FakeExtractor, FakeScraper, FakeUploader, UploadGate};

pub const POST_URL: &str = "https://example.com/post/1";

/// Isolated import environment.
pub struct TestHarness {
    /// Holds the media directory alive for the harness lifetime.
    temp_dir: TempDir,
    /// Directory downloaded media is written to.
    pub media_dir: PathBuf,
    pub store: Arc<MemoryStore>,
    pub scraper: Arc<FakeScraper>,
    pub downloader: Arc<FakeDownloader>,
    pub uploader: Arc<FakeUploader>,
    pub extractor: Arc<FakeExtractor>,
    pub service: ImportService,
}

impl TestHarness {
    /// Create a harness with the default retry policy (3 attempts, 500 ms).
    pub fn new() -> Self {
        Self::build(FakeUploader::new())
    }

    /// Create a harness whose uploader waits on `gate` before every call.
    pub fn with_upload_gate(gate: UploadGate) -> Self {
        Self::build(FakeUploader::gated(gate))
    }

    fn build(uploader: FakeUploader) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let media_dir = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_dir).expect("Failed to create media directory");

        let store = Arc::new(MemoryStore::new());
        let scraper = Arc::new(FakeScraper::new());
        let downloader = Arc::new(FakeDownloader::new(&media_dir));
        let uploader = Arc::new(uploader);
        let extractor = Arc::new(FakeExtractor::new());

        let config = PipelineConfig {
            max_stage_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            temp_dir: media_dir.clone(),
            ..PipelineConfig::default()
        };
        let services = Services {
            scraper: scraper.clone(),
            downloader: downloader.clone(),
            uploader: uploader.clone(),
            extractor: extractor.clone(),
        };
        let service = import_service(Arc::new(config), store.clone(), services);

        Self {
            temp_dir,
            media_dir,
            store,
            scraper,
            downloader,
            uploader,
            extractor,
            service,
        }
    }

    /// Submits `url` and returns the queued job.
    pub async fn submit(&self, url: &str) -> Job {
        self.service.submit(url).await.expect("Failed to submit URL")
    }

    pub async fn job(&self, id: &str) -> Job {
        JobStore::get(self.store.as_ref(), id)
            .await
            .expect("Failed to read job")
            .expect("Job should exist")
    }

    /// Files currently present in the media directory.
    pub fn media_files(&self) -> Vec<PathBuf> {
        files_in(&self.media_dir)
    }

    /// Total calls across all four collaborators.
    pub fn total_calls(&self) -> u32 {
        self.scraper.script.calls()
            + self.downloader.script.calls()
            + self.uploader.script.calls()
            + self.extractor.script.calls()
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
