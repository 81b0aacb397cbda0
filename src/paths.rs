// src/paths.rs

//! Destination paths for downloaded items.
//!
//! Everything here is pure string and path construction; nothing touches the
//! filesystem.

use crate::catalog::{Album, Playlist, Track, Video};
use crate::config::Config;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Suffix appended to a final path while its bytes are still arriving.
pub const TEMP_SUFFIX: &str = ".downloading";

const MAX_NAME_CHARS: usize = 250;
const ILLEGAL_CHARS: [char; 8] = ['<', '>', '"', '/', '\\', '|', '?', '*'];
// U+A789 MODIFIER LETTER COLON, reads like ':' but is legal everywhere.
const COLON_LOOKALIKE: char = '\u{A789}';

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)(?::(0?)(\d+)d)?\}").expect("placeholder pattern"));

/// Make a single path component safe for common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            ':' => COLON_LOOKALIKE,
            c if ILLEGAL_CHARS.contains(&c) => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// A value substituted into a folder/file template.
#[derive(Debug, Clone)]
pub enum TemplateValue {
    Text(String),
    Number(i64),
}

impl TemplateValue {
    fn render(&self, zero_pad: bool, width: usize) -> String {
        match self {
            TemplateValue::Text(text) => format!("{text:>width$}"),
            TemplateValue::Number(n) if zero_pad => format!("{n:0width$}"),
            TemplateValue::Number(n) => format!("{n:>width$}"),
        }
    }
}

/// Expand `{name}` and `{name:0Nd}` placeholders. Unknown names are left as written.
pub fn render_template(template: &str, values: &[(&str, TemplateValue)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            let Some((_, value)) = values.iter().find(|(key, _)| *key == name) else {
                return caps[0].to_string();
            };
            let zero_pad = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
            let width = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            value.render(zero_pad, width)
        })
        .into_owned()
}

fn artist_name(artist: Option<&crate::catalog::Artist>) -> String {
    sanitize_filename(artist.map_or("Unknown Artist", |a| a.name.as_str()))
}

fn title_or(name: &str, fallback: &str) -> String {
    if name.is_empty() {
        sanitize_filename(fallback)
    } else {
        sanitize_filename(name)
    }
}

fn year_value(album: Option<&Album>) -> TemplateValue {
    match album.and_then(|a| a.release_year) {
        Some(year) => TemplateValue::Number(year as i64),
        None => TemplateValue::Text("Unknown".to_string()),
    }
}

/// Destination for a track, without extension, built from the configured templates.
pub fn build_output_path(config: &Config, track: &Track, album: Option<&Album>) -> PathBuf {
    let album = album.or(track.album.as_ref());

    let values = [
        ("artist", TemplateValue::Text(artist_name(track.artist.as_ref()))),
        (
            "album",
            TemplateValue::Text(sanitize_filename(album.map_or("Unknown Album", |a| a.name.as_str()))),
        ),
        ("year", year_value(album)),
        ("quality", TemplateValue::Text(config.download_quality.to_string())),
        (
            "track_number",
            TemplateValue::Number(track.track_num.unwrap_or(1) as i64),
        ),
        ("title", TemplateValue::Text(title_or(&track.name, "Unknown Track"))),
    ];

    let folder = render_template(&config.album_folder_template, &values);
    let file = render_template(&config.track_file_template, &values);
    config.download_folder.join(folder).join(file)
}

/// Destination for the `position`-th (1-based) entry of a playlist.
///
/// As a compilation every entry lands in one folder named after the playlist;
/// otherwise entries are filed under their own artist and album.
pub fn playlist_track_path(
    config: &Config,
    playlist: &Playlist,
    position: u32,
    track: &Track,
    as_compilation: bool,
) -> PathBuf {
    let artist = artist_name(track.artist.as_ref());
    let title = title_or(&track.name, "Unknown Track");

    if as_compilation {
        let folder = title_or(&playlist.name, "Unknown Playlist");
        return config
            .download_folder
            .join(folder)
            .join(format!("{position:02} - {artist} - {title}"));
    }

    let folder = match &track.album {
        Some(album) => {
            let year = album
                .release_year
                .map_or_else(|| "Unknown".to_string(), |y| y.to_string());
            PathBuf::from(&artist).join(format!(
                "{} [{year}]",
                title_or(&album.name, "Unknown Album")
            ))
        }
        None => PathBuf::from(&artist).join("Singles"),
    };
    let number = track.track_num.unwrap_or(position);
    config
        .download_folder
        .join(folder)
        .join(format!("{number:02} - {title}"))
}

pub fn video_output_path(config: &Config, video: &Video) -> PathBuf {
    config
        .download_folder
        .join("Videos")
        .join(artist_name(video.artist.as_ref()))
        .join(title_or(&video.name, "Unknown Video"))
}

/// Append `extension` to the path, never replacing anything after an existing dot
/// (`Song (feat. X)` must not turn into `Song (feat.flac`).
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    if !extension.starts_with('.') {
        raw.push(".");
    }
    raw.push(extension);
    PathBuf::from(raw)
}

/// The single temporary sibling of a final destination.
pub fn temporary_path(final_path: &Path) -> PathBuf {
    append_extension(final_path, TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Artist;

    fn track(name: &str) -> Track {
        Track {
            id: "42".into(),
            name: name.into(),
            artist: Some(Artist { id: "7".into(), name: "AC/DC".into() }),
            album: Some(Album {
                id: "9".into(),
                name: "Live: Vol. 1".into(),
                artist: None,
                release_year: Some(1992),
                cover_url: None,
                num_tracks: Some(12),
            }),
            track_num: Some(3),
        }
    }

    #[test]
    fn sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize_filename("a<b>c\"d/e\\f|g?h*i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_filename("Artist: Title"), "Artist\u{A789} Title");
        assert_eq!(sanitize_filename("  ..hidden. . "), "hidden");
    }

    #[test]
    fn sanitize_truncates_by_characters() {
        let long = "é".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 250);
    }

    #[test]
    fn templates_pad_numbers_and_keep_unknown_placeholders() {
        let values = [
            ("track_number", TemplateValue::Number(7)),
            ("title", TemplateValue::Text("Song".into())),
        ];
        assert_eq!(render_template("{track_number:02d} - {title}", &values), "07 - Song");
        assert_eq!(render_template("{track_number} {disc}", &values), "7 {disc}");
    }

    #[test]
    fn output_path_uses_templates() {
        let config = Config {
            download_folder: PathBuf::from("/music"),
            ..Config::default()
        };
        let path = build_output_path(&config, &track("Back: In Black"), None);
        assert_eq!(
            path,
            Path::new("/music/AC_DC/Live\u{A789} Vol. 1 [1992]/03 - Back\u{A789} In Black")
        );
    }

    #[test]
    fn output_path_falls_back_to_unknowns() {
        let config = Config {
            download_folder: PathBuf::from("/music"),
            album_folder_template: "{artist}/{album} [{year}] {quality}".into(),
            ..Config::default()
        };
        let bare = Track {
            id: "1".into(),
            name: "Solo".into(),
            artist: None,
            album: None,
            track_num: None,
        };
        assert_eq!(
            build_output_path(&config, &bare, None),
            Path::new("/music/Unknown Artist/Unknown Album [Unknown] LOSSLESS/01 - Solo")
        );
    }

    #[test]
    fn playlist_paths() {
        let config = Config {
            download_folder: PathBuf::from("/music"),
            ..Config::default()
        };
        let playlist = Playlist { id: "p".into(), name: "Road Trip".into(), num_tracks: None };
        let track = track("Thunder");
        assert_eq!(
            playlist_track_path(&config, &playlist, 5, &track, true),
            Path::new("/music/Road Trip/05 - AC_DC - Thunder")
        );
        assert_eq!(
            playlist_track_path(&config, &playlist, 5, &track, false),
            Path::new("/music/AC_DC/Live\u{A789} Vol. 1 [1992]/03 - Thunder")
        );
    }

    #[test]
    fn extensions_are_appended_not_replaced() {
        let base = Path::new("/music/Song (feat. X)");
        assert_eq!(append_extension(base, ".flac"), Path::new("/music/Song (feat. X).flac"));
        assert_eq!(append_extension(base, "m4a"), Path::new("/music/Song (feat. X).m4a"));
        assert_eq!(
            temporary_path(Path::new("/music/a.flac")),
            Path::new("/music/a.flac.downloading")
        );
    }
}
