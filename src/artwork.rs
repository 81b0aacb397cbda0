// src/artwork.rs

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverMime {
    Jpeg,
    Png,
}

impl CoverMime {
    fn from_content_type(content_type: &str) -> Self {
        if content_type.contains("png") {
            CoverMime::Png
        } else {
            CoverMime::Jpeg
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverMime::Jpeg => "image/jpeg",
            CoverMime::Png => "image/png",
        }
    }
}

/// A cover image fetched for one track.
#[derive(Debug, Clone)]
pub struct Cover {
    pub mime: CoverMime,
    pub data: Vec<u8>,
}

/// Downloads cover art. Every failure just means "no cover".
#[derive(Debug, Clone)]
pub struct ArtworkFetcher {
    client: Client,
    timeout: Duration,
}

impl ArtworkFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn fetch(&self, url: &str) -> Option<Cover> {
        debug!(url, "fetching album art");
        let resp = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "failed to fetch album art");
                return None;
            }
        };
        if resp.status() != StatusCode::OK {
            warn!(url, status = %resp.status(), "failed to fetch album art");
            return None;
        }
        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(CoverMime::Jpeg, CoverMime::from_content_type);
        match resp.bytes().await {
            Ok(data) => Some(Cover {
                mime,
                data: data.to_vec(),
            }),
            Err(e) => {
                warn!(url, error = %e, "failed to read album art");
                None
            }
        }
    }
}

static SIDECAR_WRITES: AtomicU64 = AtomicU64::new(0);

/// Write `cover` next to the audio files as `folder/filename`, unless one is already there.
///
/// Tracks of one album finish on different workers, so each write goes through
/// its own temp file; whichever rename lands last wins.
pub async fn save_sidecar(cover: &Cover, folder: &Path, filename: &str) -> std::io::Result<bool> {
    let target = folder.join(filename);
    if tokio::fs::try_exists(&target).await? {
        return Ok(false);
    }
    tokio::fs::create_dir_all(folder).await?;
    let write_id = SIDECAR_WRITES.fetch_add(1, Ordering::Relaxed);
    let temp = paths::temporary_path(&folder.join(format!("{filename}.{write_id}")));
    tokio::fs::write(&temp, &cover.data).await?;
    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    info!(path = %target.display(), "saved album art");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_defaults_to_jpeg() {
        assert_eq!(CoverMime::from_content_type("image/png"), CoverMime::Png);
        assert_eq!(CoverMime::from_content_type("image/jpeg"), CoverMime::Jpeg);
        assert_eq!(CoverMime::from_content_type("application/octet-stream"), CoverMime::Jpeg);
    }

    #[tokio::test]
    async fn sidecar_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Artist").join("Album");
        let first = Cover { mime: CoverMime::Jpeg, data: b"first".to_vec() };
        let second = Cover { mime: CoverMime::Jpeg, data: b"second".to_vec() };

        assert!(save_sidecar(&first, &folder, "cover.jpg").await.unwrap());
        assert!(!save_sidecar(&second, &folder, "cover.jpg").await.unwrap());

        assert_eq!(tokio::fs::read(folder.join("cover.jpg")).await.unwrap(), b"first");
        let names: Vec<_> = std::fs::read_dir(&folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["cover.jpg"]);
    }

    #[tokio::test]
    async fn concurrent_sidecar_writes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Album");
        let cover = Cover { mime: CoverMime::Jpeg, data: b"art".to_vec() };

        let results = futures_util::future::join_all(
            (0..8).map(|_| save_sidecar(&cover, &folder, "cover.jpg")),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
        assert!(results.iter().any(|r| matches!(r, Ok(true))));
        assert_eq!(tokio::fs::read(folder.join("cover.jpg")).await.unwrap(), b"art");
        let names: Vec<_> = std::fs::read_dir(&folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["cover.jpg"]);
    }
}
