pub mod artwork;
pub mod catalog;
pub mod config;
pub mod downloader;
pub mod limiter;
pub mod logging;
pub mod models;
pub mod negotiator;
pub mod paths;
pub mod queue;
pub mod remux;
pub mod tagger;
pub mod tasks;
mod worker;

pub use worker::TaskError;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::catalog::{Album, Artist, Catalog, Playlist, Quality, StreamSource, Track, Video};
    pub use crate::config::Config;
    pub use crate::models::{DownloadTask, MediaItem, TaskStatus};
    pub use crate::queue::{DownloadQueue, QueueStatus};
    pub use crate::tasks::{
        create_album_tasks, create_artist_tasks, create_playlist_tasks, create_track_task,
        create_video_task,
    };
}
