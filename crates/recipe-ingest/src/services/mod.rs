//! External collaborators of the pipeline and the helpers wrapping them.
//!
//! The pipeline only sees the four traits defined here. Concrete scraping and
//! AI backends live outside this crate; media download, upload polling and
//! schema-validated extraction are provided as reusable building blocks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recipe::RecipeData;

pub mod download;
pub mod extract;
pub mod post;
pub mod upload;
pub mod url;

pub use download::HttpMediaDownloader;
pub use extract::{RecipeModel, RecipeSchema, SchemaExtractor};
pub use post::{extract_hashtags, select_media};
pub use upload::{FileApi, FileState, ReadyPollingUploader};
pub use url::normalize_url;

/// Failures reported by collaborators.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Content is private or unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Temporary failure: {0}")]
    Transient(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Post has no image or video")]
    NoMedia,

    #[error("Media is {size} bytes, limit is {limit}")]
    MediaTooLarge { size: u64, limit: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Extraction output invalid: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServiceError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Deterministic failures (bad input, private content, exhausted quota,
    /// invalid media) return false.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::RateLimited(_)
            | ServiceError::Transient(_)
            | ServiceError::Timeout(_)
            | ServiceError::Io { .. } => true,
            ServiceError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            ServiceError::InvalidUrl(_)
            | ServiceError::Unavailable(_)
            | ServiceError::QuotaExhausted(_)
            | ServiceError::NoMedia
            | ServiceError::MediaTooLarge { .. }
            | ServiceError::UnsupportedMediaType(_)
            | ServiceError::Validation(_) => false,
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let message = format!("{} returned {}", context, status);
        match status.as_u16() {
            429 => ServiceError::RateLimited(message),
            401 | 403 | 404 | 410 => ServiceError::Unavailable(message),
            400..=499 => ServiceError::InvalidUrl(message),
            _ => ServiceError::Transient(message),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ServiceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// A media attachment referenced by a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostOwner {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Scraped content of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    pub url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PostOwner>,
}

/// Media fetched to local storage. The file belongs to whoever requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: String,
}

/// Reference to a file held by the AI service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// Everything the extractor receives about one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub file: FileRef,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub owner_username: Option<String>,
    pub source_url: String,
}

/// Fetches post content for a normalized URL.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<RawPost, ServiceError>;
}

/// Fetches media bytes into local storage.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<DownloadedMedia, ServiceError>;
}

/// Uploads local media to the AI service's file store and waits until usable.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, path: &Path, mime_type: &str) -> Result<FileRef, ServiceError>;
}

/// Turns a post into structured recipe data.
#[async_trait]
pub trait RecipeExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RecipeData, ServiceError>;
}
