// src/config.rs

use crate::catalog::Quality;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Settings consumed by the download core.
///
/// Whoever owns configuration loading deserializes into this; missing keys
/// fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub download_quality: Quality,
    pub max_concurrent_downloads: usize,
    /// Minimum spacing between the start of two transfers, across all workers.
    pub rate_limit_delay: Duration,
    pub download_folder: PathBuf,

    pub album_folder_template: String,
    pub track_file_template: String,

    pub embed_album_art: bool,
    pub save_album_art: bool,
    pub album_art_filename: String,
    /// Album artist written for playlists downloaded as a compilation.
    pub playlist_album_artist: String,

    pub skip_existing: bool,

    pub request_timeout: Duration,
    pub cover_timeout: Duration,
    pub remux_timeout: Duration,
    /// How long an idle worker sleeps before polling the queue again.
    pub idle_poll_interval: Duration,
    /// Upper bound on joining each worker during shutdown.
    pub stop_timeout: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_quality: Quality::HighLossless,
            max_concurrent_downloads: 3,
            rate_limit_delay: Duration::from_secs(1),
            download_folder: PathBuf::from("./downloads"),
            album_folder_template: "{artist}/{album} [{year}]".to_string(),
            track_file_template: "{track_number:02d} - {title}".to_string(),
            embed_album_art: true,
            save_album_art: true,
            album_art_filename: "cover.jpg".to_string(),
            playlist_album_artist: "Various Artists".to_string(),
            skip_existing: true,
            request_timeout: Duration::from_secs(30),
            cover_timeout: Duration::from_secs(15),
            remux_timeout: Duration::from_secs(120),
            idle_poll_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}
