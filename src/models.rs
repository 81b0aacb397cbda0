// src/models.rs

use crate::catalog::{Album, Track, Video};
use crate::negotiator::StreamDescriptor;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The status of a download task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// QUEUED -> DOWNLOADING -> terminal, never backwards and never out of a terminal state.
    pub fn can_become(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Queued => next == TaskStatus::Downloading,
            TaskStatus::Downloading => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The catalog item a task downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediaItem {
    Track(Track),
    Video(Video),
}

impl MediaItem {
    pub fn name(&self) -> &str {
        match self {
            MediaItem::Track(track) => &track.name,
            MediaItem::Video(video) => &video.name,
        }
    }
}

/// One unit of work in the download queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Stable id derived from content type and catalog id.
    pub id: String,
    pub item: MediaItem,
    /// Destination as built from the path templates, without extension.
    pub base_path: PathBuf,
    /// Starts out as `base_path`; once the stream is negotiated this is the
    /// real final path including its extension.
    pub output_path: PathBuf,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: f32,
    pub error: Option<String>,
    pub album: Option<Album>,
    pub track_number: u32,
    pub total_tracks: u32,

    // Set for playlists downloaded as a single compilation.
    pub playlist_name: Option<String>,
    pub playlist_album_artist: Option<String>,

    // Populated once a stream has been negotiated.
    pub codec: Option<String>,
    pub quality: Option<String>,
    pub bit_depth: Option<u32>,
    pub sample_rate: Option<u32>,

    pub is_converting: bool,
    pub conversion_progress: f32,
}

impl DownloadTask {
    pub fn new(id: impl Into<String>, item: MediaItem, base_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            item,
            output_path: base_path.clone(),
            base_path,
            status: TaskStatus::Queued,
            progress: 0.0,
            error: None,
            album: None,
            track_number: 1,
            total_tracks: 1,
            playlist_name: None,
            playlist_album_artist: None,
            codec: None,
            quality: None,
            bit_depth: None,
            sample_rate: None,
            is_converting: false,
            conversion_progress: 0.0,
        }
    }

    /// Moves the task to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_become(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Drops everything a previous attempt left behind so the task can be queued again.
    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Queued;
        self.output_path = self.base_path.clone();
        self.progress = 0.0;
        self.error = None;
        self.is_converting = false;
        self.conversion_progress = 0.0;
    }

    pub(crate) fn apply_stream(&mut self, stream: &StreamDescriptor) {
        self.codec = Some(stream.codec.clone());
        self.quality = Some(stream.quality_label.clone());
        self.bit_depth = Some(stream.bit_depth);
        self.sample_rate = Some(stream.sample_rate);
    }

    /// Returns the path for the temporary download file.
    /// e.g., for "/music/01 - Song.flac", it returns "/music/01 - Song.flac.downloading"
    pub fn temporary_path(&self) -> PathBuf {
        paths::temporary_path(&self.output_path)
    }

    /// Codec and resolution summary for display, e.g. `FLAC • 24bit/96.0kHz`.
    pub fn format_info(&self) -> String {
        let Some(codec) = &self.codec else {
            return String::new();
        };
        match (self.bit_depth, self.sample_rate, &self.quality) {
            (Some(depth), Some(rate), _) => {
                format!("{codec} • {depth}bit/{:.1}kHz", rate as f32 / 1000.0)
            }
            (_, _, Some(quality)) => format!("{codec} • {quality}"),
            _ => codec.clone(),
        }
    }
}
