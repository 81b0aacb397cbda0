// src/worker.rs

use crate::artwork::{self, Cover};
use crate::catalog::{CatalogError, Track, Video};
use crate::downloader::{DownloadError, PartialFile};
use crate::models::{DownloadTask, MediaItem, TaskStatus};
use crate::negotiator::{StreamError, StreamUrls};
use crate::paths;
use crate::queue::Shared;
use crate::remux::ContainerPlan;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CANCELLED_MESSAGE: &str = "Download cancelled by user";

/// Everything that can end a task as FAILED (or CANCELLED).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("could not get video URL: {0}")]
    VideoUrl(#[source] CatalogError),
    #[error(transparent)]
    Transfer(#[from] DownloadError),
    #[error("failed to finalize download: {0}")]
    Finalize(#[source] std::io::Error),
}

impl TaskError {
    fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Transfer(DownloadError::Cancelled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Skipped,
}

pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>, shutdown: CancellationToken) -> Self {
        Self { id, shared, shutdown }
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.id, "worker started");
        let idle = self.shared.config.idle_poll_interval;

        while !self.shutdown.is_cancelled() {
            let Some((mut task, generation)) = self.shared.next_task() else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(idle) => {}
                }
                continue;
            };

            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Ok(Err(TaskError::Transfer(DownloadError::Cancelled))),
                _ = self.shared.limiter.acquire() => {
                    info!(worker = self.id, task_id = %task.id, name = %task.item.name(), "starting download");
                    AssertUnwindSafe(self.process(&mut task, generation))
                        .catch_unwind()
                        .await
                }
            };

            match result {
                Ok(Ok(Outcome::Completed)) => {
                    task.progress = 100.0;
                    task.advance(TaskStatus::Completed);
                    info!(worker = self.id, task_id = %task.id, path = %task.output_path.display(), "download completed");
                }
                Ok(Ok(Outcome::Skipped)) => {
                    task.advance(TaskStatus::Skipped);
                    info!(worker = self.id, task_id = %task.id, path = %task.output_path.display(), "skipping existing file");
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    task.advance(TaskStatus::Cancelled);
                    task.error = Some(CANCELLED_MESSAGE.to_string());
                    info!(worker = self.id, task_id = %task.id, "download cancelled");
                }
                Ok(Err(e)) => {
                    task.advance(TaskStatus::Failed);
                    task.error = Some(e.to_string());
                    error!(worker = self.id, task_id = %task.id, error = %e, "download failed");
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    task.advance(TaskStatus::Failed);
                    task.error = Some(message.clone());
                    error!(worker = self.id, task_id = %task.id, error = %message, "download panicked");
                }
            }

            task.is_converting = false;
            self.shared.finish(task, generation);
        }

        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, task: &mut DownloadTask, generation: u64) -> Result<Outcome, TaskError> {
        match task.item.clone() {
            MediaItem::Track(track) => self.download_track(task, &track, generation).await,
            MediaItem::Video(video) => self.download_video(task, &video, generation).await,
        }
    }

    async fn download_track(
        &self,
        task: &mut DownloadTask,
        track: &Track,
        generation: u64,
    ) -> Result<Outcome, TaskError> {
        let config = &self.shared.config;
        if config.skip_existing && task.base_path.exists() {
            return Ok(Outcome::Skipped);
        }

        let stream = self
            .shared
            .negotiator
            .resolve(track, config.download_quality)
            .await?;
        task.apply_stream(&stream);
        info!(
            task_id = %task.id,
            quality = %stream.quality_label,
            codec = %stream.codec,
            bit_depth = stream.bit_depth,
            sample_rate = stream.sample_rate,
            extension = %stream.extension,
            "stream received"
        );

        let plan = ContainerPlan::for_stream(&stream, self.shared.remuxer.is_available());
        let (download_ext, final_ext) = match &plan {
            ContainerPlan::Native { extension } => (extension.as_str(), extension.as_str()),
            ContainerPlan::Remux { generic, native } => (generic.as_str(), native.as_str()),
        };
        let download_target = paths::append_extension(&task.base_path, download_ext);
        task.output_path = paths::append_extension(&task.base_path, final_ext);
        self.shared.publish(task, generation);

        if config.skip_existing && task.output_path.exists() {
            return Ok(Outcome::Skipped);
        }

        if let Some(parent) = task.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = PartialFile::for_destination(&download_target);
        self.fetch(&task.id, generation, &stream.urls, &partial).await?;

        match plan {
            ContainerPlan::Native { .. } => {
                partial
                    .persist(&task.output_path)
                    .await
                    .map_err(TaskError::Finalize)?;
            }
            ContainerPlan::Remux { .. } => {
                self.remux_or_keep(task, generation, partial, &download_target)
                    .await?;
            }
        }

        let album = task.album.clone().or_else(|| track.album.clone());
        let cover = self.cover_for(album.as_ref().and_then(|a| a.cover_url.as_deref())).await;
        let embedded_cover = cover.as_ref().filter(|_| config.embed_album_art);
        self.shared
            .embedder
            .embed(track, &task.output_path, album.as_ref(), Some(&*task), embedded_cover)
            .await;

        // Compilations mix albums in one folder, so they get no sidecar.
        let sidecar = cover.as_ref().filter(|_| config.save_album_art && task.playlist_name.is_none());
        if let (Some(cover), Some(folder)) = (sidecar, task.output_path.parent()) {
            if let Err(e) = artwork::save_sidecar(cover, folder, &config.album_art_filename).await {
                warn!(task_id = %task.id, error = %e, "failed to save album art");
            }
        }

        Ok(Outcome::Completed)
    }

    /// Remux the downloaded generic container into FLAC. If that fails the
    /// download is kept under its generic extension instead.
    async fn remux_or_keep(
        &self,
        task: &mut DownloadTask,
        generation: u64,
        partial: PartialFile,
        download_target: &Path,
    ) -> Result<(), TaskError> {
        task.is_converting = true;
        task.conversion_progress = 0.0;
        self.shared.publish(task, generation);

        let remuxed = PartialFile::for_destination(&task.output_path);
        info!(task_id = %task.id, from = %partial.path().display(), to = %task.output_path.display(), "remuxing");
        let converted = self.shared.remuxer.remux(partial.path(), remuxed.path()).await
            && remuxed.persist(&task.output_path).await.is_ok();

        task.is_converting = false;
        if converted {
            task.conversion_progress = 100.0;
            // `partial` is dropped here, removing the generic download.
            return Ok(());
        }

        warn!(task_id = %task.id, "remux failed, keeping as M4A file");
        partial
            .persist(download_target)
            .await
            .map_err(TaskError::Finalize)?;
        task.output_path = download_target.to_path_buf();
        Ok(())
    }

    async fn download_video(
        &self,
        task: &mut DownloadTask,
        video: &Video,
        generation: u64,
    ) -> Result<Outcome, TaskError> {
        task.output_path = paths::append_extension(&task.base_path, ".mp4");
        self.shared.publish(task, generation);
        if self.shared.config.skip_existing && task.output_path.exists() {
            return Ok(Outcome::Skipped);
        }

        let url = self
            .shared
            .negotiator
            .source()
            .get_video_url(video)
            .await
            .map_err(TaskError::VideoUrl)?;

        if let Some(parent) = task.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = PartialFile::for_destination(&task.output_path);
        self.fetch(&task.id, generation, &StreamUrls::Single(url), &partial)
            .await?;
        partial
            .persist(&task.output_path)
            .await
            .map_err(TaskError::Finalize)?;
        Ok(Outcome::Completed)
    }

    async fn fetch(
        &self,
        task_id: &str,
        generation: u64,
        urls: &StreamUrls,
        partial: &PartialFile,
    ) -> Result<(), DownloadError> {
        let shared = &self.shared;
        let on_progress = |pct: f32| shared.set_progress(task_id, generation, pct);
        debug!(task_id, path = %partial.path().display(), segments = urls.as_slice().len(), "fetching");
        shared
            .fetcher
            .fetch(urls, partial.path(), &self.shutdown, &on_progress)
            .await
    }

    /// Fetch the cover once if anything is going to use it.
    async fn cover_for(&self, url: Option<&str>) -> Option<Cover> {
        let config = &self.shared.config;
        if !(config.embed_album_art || config.save_album_art) {
            return None;
        }
        self.shared.artwork.fetch(url?).await
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Transfer(DownloadError::Io(e))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
