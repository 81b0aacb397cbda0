// src/tagger.rs

use crate::artwork::{Cover, CoverMime};
use crate::catalog::{Album, Track};
use crate::models::DownloadTask;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum TagError {
    #[error("FLAC tag error: {0}")]
    Flac(#[from] metaflac::Error),
    #[error("MP4 tag error: {0}")]
    Mp4(#[from] mp4ameta::Error),
    #[error("tag writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The containers we know how to tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    Flac,
    Mp4,
}

impl TagFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "flac" => Some(TagFormat::Flac),
            "m4a" | "mp4" => Some(TagFormat::Mp4),
            _ => None,
        }
    }
}

/// The tag values for one file, after playlist overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub track_number: u32,
    pub total_tracks: Option<u32>,
    pub year: Option<i32>,
}

impl TrackTags {
    pub fn resolve(track: &Track, album: Option<&Album>, task: Option<&DownloadTask>) -> Self {
        let artist = track.artist.as_ref().map(|a| a.name.clone()).unwrap_or_default();
        let year = album
            .and_then(|a| a.release_year)
            .or_else(|| track.album.as_ref().and_then(|a| a.release_year));

        let compilation = task.and_then(|t| t.playlist_name.as_ref().map(|name| (t, name)));
        match compilation {
            Some((task, playlist_name)) => Self {
                title: track.name.clone(),
                artist,
                album: playlist_name.clone(),
                album_artist: Some(
                    task.playlist_album_artist
                        .clone()
                        .unwrap_or_else(|| "Various Artists".to_string()),
                ),
                track_number: task.track_number.max(1),
                total_tracks: Some(task.total_tracks),
                year,
            },
            None => Self {
                title: track.name.clone(),
                artist,
                album: album
                    .or(track.album.as_ref())
                    .map(|a| a.name.clone())
                    .unwrap_or_default(),
                album_artist: None,
                track_number: track.track_num.unwrap_or(1),
                total_tracks: None,
                year,
            },
        }
    }
}

/// Write `tags` (and optionally a front cover) into the file at `path`.
pub fn write_tags(
    format: TagFormat,
    path: &Path,
    tags: &TrackTags,
    cover: Option<&Cover>,
) -> Result<(), TagError> {
    match format {
        TagFormat::Flac => write_flac(path, tags, cover),
        TagFormat::Mp4 => write_mp4(path, tags, cover),
    }
}

fn write_flac(path: &Path, tags: &TrackTags, cover: Option<&Cover>) -> Result<(), TagError> {
    use metaflac::block::PictureType;

    let mut tag = metaflac::Tag::read_from_path(path)?;
    tag.set_vorbis("TITLE", vec![tags.title.clone()]);
    tag.set_vorbis("ARTIST", vec![tags.artist.clone()]);
    tag.set_vorbis("ALBUM", vec![tags.album.clone()]);
    if let Some(album_artist) = &tags.album_artist {
        tag.set_vorbis("ALBUMARTIST", vec![album_artist.clone()]);
    }
    tag.set_vorbis("TRACKNUMBER", vec![tags.track_number.to_string()]);
    if let Some(year) = tags.year {
        tag.set_vorbis("DATE", vec![year.to_string()]);
        tag.set_vorbis("YEAR", vec![year.to_string()]);
    }
    if let Some(cover) = cover {
        tag.remove_picture_type(PictureType::CoverFront);
        tag.add_picture(cover.mime.as_str(), PictureType::CoverFront, cover.data.clone());
        debug!(bytes = cover.data.len(), "album art embedded");
    }
    tag.save()?;
    Ok(())
}

fn write_mp4(path: &Path, tags: &TrackTags, cover: Option<&Cover>) -> Result<(), TagError> {
    use mp4ameta::{Img, ImgFmt};

    let mut tag = mp4ameta::Tag::read_from_path(path)?;
    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    tag.set_album(tags.album.clone());
    if let Some(album_artist) = &tags.album_artist {
        tag.set_album_artist(album_artist.clone());
    }
    tag.set_track_number(u16::try_from(tags.track_number).unwrap_or(u16::MAX));
    if let Some(total) = tags.total_tracks.filter(|t| *t > 0) {
        tag.set_total_tracks(u16::try_from(total).unwrap_or(u16::MAX));
    }
    if let Some(year) = tags.year {
        tag.set_year(year.to_string());
    }
    if let Some(cover) = cover {
        let fmt = match cover.mime {
            CoverMime::Png => ImgFmt::Png,
            CoverMime::Jpeg => ImgFmt::Jpeg,
        };
        tag.set_artwork(Img::new(fmt, cover.data.clone()));
    }
    tag.write_to_path(path)?;
    Ok(())
}

/// Best-effort tagging of finished downloads.
#[derive(Debug, Clone, Default)]
pub struct MetadataEmbedder;

impl MetadataEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Tag the file at `path`. Failures are logged, never returned: a file that
    /// downloaded fine stays downloaded even if it can't be tagged.
    pub async fn embed(
        &self,
        track: &Track,
        path: &Path,
        album: Option<&Album>,
        task: Option<&DownloadTask>,
        cover: Option<&Cover>,
    ) {
        let Some(format) = TagFormat::from_path(path) else {
            debug!(path = %path.display(), "no tagger for this container");
            return;
        };
        let tags = TrackTags::resolve(track, album, task);
        if task.is_some_and(|t| t.playlist_name.is_some()) {
            debug!(album = %tags.album, album_artist = ?tags.album_artist, "playlist compilation metadata");
        }

        let owned_path: PathBuf = path.to_path_buf();
        let owned_cover = cover.cloned();
        let title = tags.title.clone();
        let result = tokio::task::spawn_blocking(move || {
            write_tags(format, &owned_path, &tags, owned_cover.as_ref())
        })
        .await
        .map_err(TagError::from)
        .and_then(|r| r);

        match result {
            Ok(()) => info!(path = %path.display(), title = %title, "metadata embedded"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to embed metadata"),
        }
    }
}
