//! Scripted collaborators.
//!
//! Each fake fails with queued errors first (or forever, with `always_fail`)
//! and succeeds otherwise. Every call is counted.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use recipe_ingest::services::{
    DownloadedMedia, ExtractionRequest, FileRef, MediaDownloader, MediaKind, MediaRef,
    MediaUploader, PostOwner, RawPost, RecipeExtractor, Scraper, ServiceError,
};
use recipe_ingest::RecipeData;

/// Failure script shared by all fakes.
#[derive(Default)]
pub struct Script {
    calls: AtomicU32,
    queued: Mutex<VecDeque<ServiceError>>,
    always: Mutex<Option<fn() -> ServiceError>>,
}

impl Script {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: ServiceError) {
        self.queued.lock().unwrap().push_back(error);
    }

    pub fn always_fail(&self, make: fn() -> ServiceError) {
        *self.always.lock().unwrap() = Some(make);
    }

    fn begin(&self) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = *self.always.lock().unwrap() {
            return Err(make());
        }
        match self.queued.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn transient() -> ServiceError {
    ServiceError::Transient("connection reset".to_string())
}

pub fn private_post() -> ServiceError {
    ServiceError::Unavailable("account is private".to_string())
}

pub struct FakeScraper {
    pub script: Script,
    pub post: Mutex<RawPost>,
}

impl FakeScraper {
    /// Scrapes a post with a cover image and a video.
    pub fn new() -> Self {
        Self {
            script: Script::default(),
            post: Mutex::new(RawPost {
                url: String::new(),
                caption: "Crispy chickpea bowl #dinner #vegan #Dinner".to_string(),
                media: vec![
                    MediaRef {
                        url: "https://cdn.example.com/cover.jpg".to_string(),
                        kind: MediaKind::Image,
                    },
                    MediaRef {
                        url: "https://cdn.example.com/clip.mp4".to_string(),
                        kind: MediaKind::Video,
                    },
                ],
                owner: Some(PostOwner {
                    username: "chef_ana".to_string(),
                    full_name: None,
                }),
            }),
        }
    }

    pub fn set_media(&self, media: Vec<MediaRef>) {
        self.post.lock().unwrap().media = media;
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, url: &str) -> Result<RawPost, ServiceError> {
        self.script.begin()?;
        let mut post = self.post.lock().unwrap().clone();
        post.url = url.to_string();
        Ok(post)
    }
}

/// Writes a real file per successful download.
pub struct FakeDownloader {
    pub script: Script,
    dir: PathBuf,
    pub urls: Mutex<Vec<String>>,
    pub created: Mutex<Vec<PathBuf>>,
}

impl FakeDownloader {
    pub fn new(dir: &Path) -> Self {
        Self {
            script: Script::default(),
            dir: dir.to_path_buf(),
            urls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedMedia, ServiceError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.script.begin()?;

        let path = self
            .dir
            .join(format!("{}.mp4", uuid::Uuid::new_v4()));
        let bytes = b"\x00\x00\x00\x18ftypmp42";
        std::fs::write(&path, bytes).map_err(|e| ServiceError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.created.lock().unwrap().push(path.clone());

        Ok(DownloadedMedia {
            path,
            size: bytes.len() as u64,
            mime_type: "video/mp4".to_string(),
        })
    }
}

/// Optionally parks inside `upload` until released, so a test can act while
/// a stage is in flight.
pub struct FakeUploader {
    pub script: Script,
    pub gate: Option<UploadGate>,
}

#[derive(Clone, Default)]
pub struct UploadGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self {
            script: Script::default(),
            gate: None,
        }
    }

    pub fn gated(gate: UploadGate) -> Self {
        Self {
            script: Script::default(),
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl MediaUploader for FakeUploader {
    async fn upload(&self, path: &Path, mime_type: &str) -> Result<FileRef, ServiceError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.script.begin()?;
        assert!(path.exists(), "uploading a file that does not exist");

        Ok(FileRef {
            name: "files/clip".to_string(),
            uri: "https://ai.example.com/v1/files/clip".to_string(),
            mime_type: mime_type.to_string(),
        })
    }
}

pub struct FakeExtractor {
    pub script: Script,
    pub requests: Mutex<Vec<ExtractionRequest>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self {
            script: Script::default(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RecipeExtractor for FakeExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RecipeData, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.begin()?;

        Ok(RecipeData {
            title: "Crispy Chickpea Bowl".to_string(),
            description: Some("Roasted chickpeas over rice".to_string()),
            ingredients: vec![
                "1 can chickpeas".to_string(),
                "1 cup rice".to_string(),
                "1 tbsp olive oil".to_string(),
            ],
            instructions: vec![
                "Roast the chickpeas at 220C for 25 minutes.".to_string(),
                "Serve over rice.".to_string(),
            ],
            servings: Some(2),
            prep_time_minutes: Some(5),
            cook_time_minutes: Some(25),
            tags: request.hashtags.clone(),
        })
    }
}
