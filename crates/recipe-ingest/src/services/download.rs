//! HTTP media downloader with size and MIME gating.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{DownloadedMedia, MediaDownloader, ServiceError};

/// Streams media to `temp_dir`, rejecting anything that is not an image or a
/// video or that exceeds `max_bytes`. A partially written file is removed
/// before an error is returned.
pub struct HttpMediaDownloader {
    client: Client,
    temp_dir: PathBuf,
    max_bytes: u64,
}

impl HttpMediaDownloader {
    pub fn new(client: Client, temp_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            client,
            temp_dir: temp_dir.into(),
            max_bytes,
        }
    }

    async fn write_body(&self, response: &mut Response, path: &Path) -> Result<u64, ServiceError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ServiceError::io(path, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(ServiceError::MediaTooLarge {
                    size: written,
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| ServiceError::io(path, e))?;
        }

        file.flush().await.map_err(|e| ServiceError::io(path, e))?;
        Ok(written)
    }
}

/// Bare, lowercased MIME type from a `Content-Type` header value.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn check_mime(mime_type: &str) -> Result<(), ServiceError> {
    if mime_type.starts_with("image/") || mime_type.starts_with("video/") {
        Ok(())
    } else if mime_type.is_empty() {
        Err(ServiceError::UnsupportedMediaType(
            "missing content type".to_string(),
        ))
    } else {
        Err(ServiceError::UnsupportedMediaType(mime_type.to_string()))
    }
}

fn temp_file_name(mime_type: &str) -> String {
    let ext = mime_guess::get_mime_extensions_str(mime_type)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("bin");
    format!("{}.{}", uuid::Uuid::new_v4(), ext)
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedMedia, ServiceError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status, "media download"));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence)
            .unwrap_or_default();
        check_mime(&mime_type)?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(ServiceError::MediaTooLarge {
                    size: length,
                    limit: self.max_bytes,
                });
            }
        }

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| ServiceError::io(&self.temp_dir, e))?;
        let path = self.temp_dir.join(temp_file_name(&mime_type));

        match self.write_body(&mut response, &path).await {
            Ok(size) => {
                debug!("Downloaded {} bytes of {} to {}", size, mime_type, path.display());
                Ok(DownloadedMedia {
                    path,
                    size,
                    mime_type,
                })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", path.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }
}
