// src/downloader.rs

use crate::negotiator::StreamUrls;
use crate::paths;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { status: StatusCode, url: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("download cancelled")]
    Cancelled,
}

/// Receives transfer progress as a percentage in 0..=100.
pub type Progress<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Moves the bytes of a stream into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write everything `urls` points at into `dest`, in order.
    ///
    /// Stops between chunks once `cancel` fires and returns
    /// [`DownloadError::Cancelled`]. Whatever was written so far stays on disk
    /// for the caller to remove.
    async fn fetch(
        &self,
        urls: &StreamUrls,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: Progress<'_>,
    ) -> Result<(), DownloadError>;
}

/// The default [`Fetcher`], streaming over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// `timeout` is only used to label timeout errors; the client carries the
    /// actual connect/read timeouts.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn classify(&self, err: reqwest::Error) -> DownloadError {
        if err.is_timeout() {
            DownloadError::Timeout(self.timeout)
        } else {
            DownloadError::Network(err)
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    async fn fetch_single(
        &self,
        url: &str,
        file: &mut File,
        cancel: &CancellationToken,
        on_progress: Progress<'_>,
    ) -> Result<(), DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let resp = self.get(url).await?;
        let total = resp.content_length().filter(|len| *len > 0);
        let mut downloaded = 0u64;

        let mut stream = resp.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| self.classify(e))?;
            file.write_all(&bytes).await?;
            downloaded += bytes.len() as u64;
            if let Some(total) = total {
                on_progress((downloaded as f32 / total as f32 * 100.0).min(100.0));
            }
        }
        Ok(())
    }

    async fn fetch_segments(
        &self,
        urls: &[String],
        file: &mut File,
        cancel: &CancellationToken,
        on_progress: Progress<'_>,
    ) -> Result<(), DownloadError> {
        let count = urls.len();
        for (i, url) in urls.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                body = async { self.get(url).await?.bytes().await.map_err(|e| self.classify(e)) } => body?,
            };
            file.write_all(&body).await?;
            on_progress((i + 1) as f32 / count as f32 * 100.0);
            debug!(segment = i + 1, count, "segment written");
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        urls: &StreamUrls,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: Progress<'_>,
    ) -> Result<(), DownloadError> {
        let mut file = File::create(dest).await?;
        let result = match urls {
            StreamUrls::Single(url) => self.fetch_single(url, &mut file, cancel, on_progress).await,
            StreamUrls::Segmented(urls) => {
                self.fetch_segments(urls, &mut file, cancel, on_progress).await
            }
        };
        file.flush().await?;
        result
    }
}

/// The temporary sibling a download is written to before it gets its final name.
///
/// Removed on drop unless [`PartialFile::persist`] succeeded, so every
/// failure, cancellation or abort path cleans up after itself.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub fn for_destination(final_path: &Path) -> Self {
        Self {
            path: paths::temporary_path(final_path),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename into place. On error the temp file is still removed on drop.
    pub async fn persist(mut self, final_path: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, final_path).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove partial download"),
        }
    }
}
