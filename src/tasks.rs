// src/tasks.rs

//! Turn catalog items into [`DownloadTask`]s with their destinations resolved.

use crate::catalog::{Album, Artist, Catalog, CatalogError, Playlist, Track, Video};
use crate::config::Config;
use crate::models::{DownloadTask, MediaItem};
use crate::paths;
use tracing::{debug, info};

pub fn create_track_task(config: &Config, track: &Track) -> DownloadTask {
    let path = paths::build_output_path(config, track, None);
    DownloadTask::new(
        format!("track_{}", track.id),
        MediaItem::Track(track.clone()),
        path,
    )
}

pub fn create_video_task(config: &Config, video: &Video) -> DownloadTask {
    let path = paths::video_output_path(config, video);
    DownloadTask::new(
        format!("video_{}", video.id),
        MediaItem::Video(video.clone()),
        path,
    )
}

/// One task per album track, numbered by position in the album.
pub async fn create_album_tasks(
    config: &Config,
    catalog: &dyn Catalog,
    album: &Album,
) -> Result<Vec<DownloadTask>, CatalogError> {
    let tracks = catalog.album_tracks(album).await?;
    let total = tracks.len() as u32;

    let tasks = tracks
        .into_iter()
        .zip(1u32..)
        .map(|(track, position)| {
            let path = paths::build_output_path(config, &track, Some(album));
            let mut task =
                DownloadTask::new(format!("track_{}", track.id), MediaItem::Track(track), path);
            task.album = Some(album.clone());
            task.track_number = position;
            task.total_tracks = total;
            task
        })
        .collect::<Vec<_>>();

    debug!(album_id = %album.id, count = tasks.len(), "created album tasks");
    Ok(tasks)
}

/// One task per playlist entry. Entry ids carry their position, so a track
/// listed twice yields two tasks.
///
/// With `as_compilation` every file goes into one folder named after the
/// playlist and is tagged as part of a compilation album of that name.
pub async fn create_playlist_tasks(
    config: &Config,
    catalog: &dyn Catalog,
    playlist: &Playlist,
    as_compilation: bool,
) -> Result<Vec<DownloadTask>, CatalogError> {
    let tracks = catalog.playlist_tracks(playlist).await?;
    let total = tracks.len() as u32;

    let tasks = tracks
        .into_iter()
        .zip(1u32..)
        .map(|(track, position)| {
            let path = paths::playlist_track_path(config, playlist, position, &track, as_compilation);
            let id = format!("track_{}_pl_{}_{position}", track.id, playlist.id);
            let album = track.album.clone();
            let mut task = DownloadTask::new(id, MediaItem::Track(track), path);
            task.album = album;
            task.track_number = position;
            task.total_tracks = total;
            if as_compilation {
                task.playlist_name = Some(playlist.name.clone());
                task.playlist_album_artist = Some(config.playlist_album_artist.clone());
            }
            task
        })
        .collect::<Vec<_>>();

    debug!(playlist_id = %playlist.id, count = tasks.len(), as_compilation, "created playlist tasks");
    Ok(tasks)
}

/// Album tasks for the artist's whole discography.
pub async fn create_artist_tasks(
    config: &Config,
    catalog: &dyn Catalog,
    artist: &Artist,
) -> Result<Vec<DownloadTask>, CatalogError> {
    let albums = catalog.artist_albums(artist).await?;
    let mut tasks = Vec::new();
    for album in &albums {
        tasks.extend(create_album_tasks(config, catalog, album).await?);
    }
    info!(artist = %artist.name, albums = albums.len(), tracks = tasks.len(), "created artist tasks");
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn artist(name: &str) -> Artist {
        Artist { id: name.to_lowercase(), name: name.into() }
    }

    fn album(id: &str, name: &str, year: i32) -> Album {
        Album {
            id: id.into(),
            name: name.into(),
            artist: Some(artist("Band")),
            release_year: Some(year),
            cover_url: None,
            num_tracks: None,
        }
    }

    fn track(id: &str, name: &str, album: Option<Album>, track_num: Option<u32>) -> Track {
        Track {
            id: id.into(),
            name: name.into(),
            artist: Some(artist("Band")),
            album,
            track_num,
        }
    }

    #[derive(Default)]
    struct StubCatalog {
        album_tracks: HashMap<String, Vec<Track>>,
        playlist_tracks: Vec<Track>,
        albums: Vec<Album>,
    }

    #[async_trait]
    impl Catalog for StubCatalog {
        async fn get_track(&self, id: &str) -> Result<Track, CatalogError> {
            Err(CatalogError::NotFound { kind: "track", id: id.into() })
        }
        async fn get_album(&self, id: &str) -> Result<Album, CatalogError> {
            Err(CatalogError::NotFound { kind: "album", id: id.into() })
        }
        async fn get_playlist(&self, id: &str) -> Result<Playlist, CatalogError> {
            Err(CatalogError::NotFound { kind: "playlist", id: id.into() })
        }
        async fn get_artist(&self, id: &str) -> Result<Artist, CatalogError> {
            Err(CatalogError::NotFound { kind: "artist", id: id.into() })
        }
        async fn get_video(&self, id: &str) -> Result<Video, CatalogError> {
            Err(CatalogError::NotFound { kind: "video", id: id.into() })
        }
        async fn album_tracks(&self, album: &Album) -> Result<Vec<Track>, CatalogError> {
            self.album_tracks
                .get(&album.id)
                .cloned()
                .ok_or_else(|| CatalogError::Http { status: 500, message: "boom".into() })
        }
        async fn playlist_tracks(&self, _: &Playlist) -> Result<Vec<Track>, CatalogError> {
            Ok(self.playlist_tracks.clone())
        }
        async fn artist_albums(&self, _: &Artist) -> Result<Vec<Album>, CatalogError> {
            Ok(self.albums.clone())
        }
    }

    fn config() -> Config {
        Config {
            download_folder: PathBuf::from("/music"),
            ..Config::default()
        }
    }

    #[test]
    fn single_items_get_prefixed_ids() {
        let task = create_track_task(&config(), &track("7", "Song", None, Some(3)));
        assert_eq!(task.id, "track_7");
        assert_eq!(task.output_path, PathBuf::from("/music/Band/Unknown Album [Unknown]/03 - Song"));

        let video = Video { id: "9".into(), name: "Clip".into(), artist: Some(artist("Band")) };
        let task = create_video_task(&config(), &video);
        assert_eq!(task.id, "video_9");
        assert_eq!(task.output_path, PathBuf::from("/music/Videos/Band/Clip"));
    }

    #[tokio::test]
    async fn album_tasks_are_numbered_by_position() {
        let record = album("a1", "Record", 2001);
        let catalog = StubCatalog {
            album_tracks: HashMap::from([(
                "a1".to_string(),
                vec![track("1", "One", None, None), track("2", "Two", None, None)],
            )]),
            ..StubCatalog::default()
        };

        let tasks = create_album_tasks(&config(), &catalog, &record).await.unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, "track_2");
        assert_eq!((tasks[1].track_number, tasks[1].total_tracks), (2, 2));
        assert_eq!(tasks[0].album.as_ref().map(|a| a.name.as_str()), Some("Record"));
        assert_eq!(tasks[0].output_path, PathBuf::from("/music/Band/Record [2001]/01 - One"));
    }

    #[tokio::test]
    async fn compilation_playlists_share_one_folder() {
        let playlist = Playlist { id: "p1".into(), name: "Road Trip".into(), num_tracks: None };
        let repeated = track("5", "Highway", Some(album("a", "Orig", 1979)), Some(9));
        let catalog = StubCatalog {
            playlist_tracks: vec![repeated.clone(), repeated],
            ..StubCatalog::default()
        };

        let tasks = create_playlist_tasks(&config(), &catalog, &playlist, true)
            .await
            .unwrap();

        assert_eq!(tasks[0].id, "track_5_pl_p1_1");
        assert_eq!(tasks[1].id, "track_5_pl_p1_2");
        assert_eq!(tasks[1].output_path, PathBuf::from("/music/Road Trip/02 - Band - Highway"));
        assert_eq!(tasks[1].playlist_name.as_deref(), Some("Road Trip"));
        assert_eq!(tasks[1].playlist_album_artist.as_deref(), Some("Various Artists"));
        assert_eq!((tasks[1].track_number, tasks[1].total_tracks), (2, 2));
    }

    #[tokio::test]
    async fn non_compilation_playlists_file_by_album() {
        let playlist = Playlist { id: "p1".into(), name: "Mix".into(), num_tracks: None };
        let catalog = StubCatalog {
            playlist_tracks: vec![
                track("5", "Highway", Some(album("a", "Orig", 1979)), Some(9)),
                track("6", "Loose", None, None),
            ],
            ..StubCatalog::default()
        };

        let tasks = create_playlist_tasks(&config(), &catalog, &playlist, false)
            .await
            .unwrap();

        assert_eq!(tasks[0].output_path, PathBuf::from("/music/Band/Orig [1979]/09 - Highway"));
        assert_eq!(tasks[1].output_path, PathBuf::from("/music/Band/Singles/02 - Loose"));
        assert!(tasks.iter().all(|t| t.playlist_name.is_none()));
    }

    #[tokio::test]
    async fn artist_tasks_cover_every_album_and_propagate_errors() {
        let mut catalog = StubCatalog {
            album_tracks: HashMap::from([
                ("a1".to_string(), vec![track("1", "One", None, None)]),
                ("a2".to_string(), vec![track("2", "Two", None, None), track("3", "Three", None, None)]),
            ]),
            albums: vec![album("a1", "First", 2000), album("a2", "Second", 2002)],
            ..StubCatalog::default()
        };

        let tasks = create_artist_tasks(&config(), &catalog, &artist("Band")).await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["track_1", "track_2", "track_3"]);

        catalog.albums.push(album("missing", "Lost", 2005));
        let err = create_artist_tasks(&config(), &catalog, &artist("Band")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Http { status: 500, .. }));
    }
}
