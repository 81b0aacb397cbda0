// src/catalog.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the remote catalog client.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("could not decode catalog response: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    /// True when the catalog rejected the session itself (401/403).
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403, .. })
    }
}

/// Audio quality tiers offered by the catalog, best first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    HiResLossless,
    HighLossless,
    Low320k,
    Low96k,
}

impl Quality {
    /// The fixed fallback ladder, in descending order.
    pub const LADDER: [Quality; 4] = [
        Quality::HiResLossless,
        Quality::HighLossless,
        Quality::Low320k,
        Quality::Low96k,
    ];

    /// The tiers to try when `self` is preferred: `self` and everything below it.
    pub fn ladder_from(self) -> &'static [Quality] {
        let start = Self::LADDER.iter().position(|q| *q == self).unwrap_or(0);
        &Self::LADDER[start..]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::HiResLossless => "HI_RES_LOSSLESS",
            Quality::HighLossless => "LOSSLESS",
            Quality::Low320k => "HIGH",
            Quality::Low96k => "LOW",
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::HighLossless
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: Option<Artist>,
    pub release_year: Option<i32>,
    /// Cover image URL, already sized by the catalog client.
    pub cover_url: Option<String>,
    pub num_tracks: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist: Option<Artist>,
    pub album: Option<Album>,
    pub track_num: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub name: String,
    pub artist: Option<Artist>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub num_tracks: Option<u32>,
}

/// What the catalog hands back when asked for a track's stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamManifest {
    pub codec: Option<String>,
    /// Container extension including the leading dot, e.g. `.flac`.
    pub file_extension: Option<String>,
    /// Quality label the catalog reports for the stream it actually served.
    pub audio_quality: Option<String>,
    pub bit_depth: Option<u32>,
    pub sample_rate: Option<u32>,
    pub urls: Vec<String>,
}

/// The part of an authenticated session the download core talks to.
///
/// The quality setting is session-wide; callers that change it must
/// serialize the change together with the `get_stream` call that depends on it.
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn quality(&self) -> Quality;

    fn set_quality(&self, quality: Quality);

    async fn get_stream(&self, track: &Track) -> Result<StreamManifest, CatalogError>;

    async fn get_video_url(&self, video: &Video) -> Result<String, CatalogError>;
}

/// Lookups used by the task-construction helpers.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_track(&self, id: &str) -> Result<Track, CatalogError>;
    async fn get_album(&self, id: &str) -> Result<Album, CatalogError>;
    async fn get_playlist(&self, id: &str) -> Result<Playlist, CatalogError>;
    async fn get_artist(&self, id: &str) -> Result<Artist, CatalogError>;
    async fn get_video(&self, id: &str) -> Result<Video, CatalogError>;

    async fn album_tracks(&self, album: &Album) -> Result<Vec<Track>, CatalogError>;
    async fn playlist_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, CatalogError>;
    async fn artist_albums(&self, artist: &Artist) -> Result<Vec<Album>, CatalogError>;
}
