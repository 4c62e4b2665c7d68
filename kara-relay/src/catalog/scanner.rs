//! Song directory scanner
//!
//! Every directory directly under the catalog root is one song. Titles are
//! derived from the directory name and companion assets are detected by
//! file naming conventions of the separation tooling.

use kara_common::Song;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Trailing `_<hex>_<YYYYMMDD>_<HHMMSS>` token added by the download tooling
static GENERATED_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_[a-f0-9]+_\d{8}_\d{6}$").expect("valid token pattern"));

const OFFICIAL_VIDEO_SUFFIX: &str = "_Official_Video";

/// Video container extensions, compared case-insensitively
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov"];

const MELODY_SUFFIX: &str = "_melody.txt";
const MELODY_MARKER: &str = "melody.txt";
const SEPARATED_SUFFIX: &str = "_separated";
const SEPARATED_MARKER: &str = "separated";

/// Catalog root problems
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Songs directory not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Cannot read {0}: {1}")]
    Unreadable(PathBuf, std::io::Error),
}

/// Scan the catalog root, failing soft
///
/// An absent or unreadable root yields an empty list and a warning.
pub fn scan(root: &Path) -> Vec<Song> {
    match try_scan(root) {
        Ok(songs) => songs,
        Err(e) => {
            tracing::warn!("Catalog scan skipped: {}", e);
            Vec::new()
        }
    }
}

/// Scan the catalog root, reporting why it could not be read
pub fn try_scan(root: &Path) -> Result<Vec<Song>, ScanError> {
    if !root.exists() {
        return Err(ScanError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let entries =
        std::fs::read_dir(root).map_err(|e| ScanError::Unreadable(root.to_path_buf(), e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing catalog entry: {}", e);
                continue;
            }
        };
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!("Skipping non-UTF-8 song directory {:?}", raw),
        }
    }
    names.sort();

    let songs: Vec<Song> = names.iter().map(|name| describe_song(root, name)).collect();
    tracing::debug!("Scanned {} songs under {}", songs.len(), root.display());
    Ok(songs)
}

/// Build the catalog entry for `root/<dir_name>`
pub fn describe_song(root: &Path, dir_name: &str) -> Song {
    let song_dir = root.join(dir_name);
    let stems = candidate_stems(dir_name);
    let entry_names = list_entry_names(&song_dir);

    let has_melody = stems
        .iter()
        .any(|stem| song_dir.join(format!("{}{}", stem, MELODY_SUFFIX)).exists())
        || entry_names.iter().any(|name| name.contains(MELODY_MARKER));

    let has_instrumental = stems
        .iter()
        .any(|stem| song_dir.join(format!("{}{}", stem, SEPARATED_SUFFIX)).exists())
        || entry_names.iter().any(|name| name.contains(SEPARATED_MARKER));

    let video_files = find_videos(root, &song_dir);
    let primary_video = select_primary_video(&video_files);

    Song {
        id: dir_name.to_string(),
        title: derive_title(dir_name),
        directory: dir_name.to_string(),
        has_melody,
        has_instrumental,
        video_files,
        primary_video,
    }
}

/// Strip the generated token, if present
pub fn strip_generated_token(id: &str) -> &str {
    match GENERATED_TOKEN.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// Human-readable title for a song directory name
pub fn derive_title(id: &str) -> String {
    let stripped = strip_generated_token(id);
    let stripped = stripped.strip_suffix(OFFICIAL_VIDEO_SUFFIX).unwrap_or(stripped);
    stripped.replace('_', " ")
}

fn first_segment(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}

/// Stems tried when looking for `<stem>_melody.txt` / `<stem>_separated`
///
/// In order, deduplicated: full id, id without the generated token, first
/// segment of that, first segment of the raw id.
pub fn candidate_stems(id: &str) -> Vec<&str> {
    let stripped = strip_generated_token(id);
    let mut stems: Vec<&str> = Vec::with_capacity(4);
    for stem in [id, stripped, first_segment(stripped), first_segment(id)] {
        if !stem.is_empty() && !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems
}

fn list_entry_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

fn is_video(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
            .unwrap_or(false)
}

/// Video files under `song_dir`, relative to `root`, `/`-separated, sorted
fn find_videos(root: &Path, song_dir: &Path) -> Vec<String> {
    let mut videos: Vec<String> = WalkDir::new(song_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                None
            }
        })
        .filter(is_video)
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Option<Vec<&str>> =
                relative.components().map(|c| c.as_os_str().to_str()).collect();
            parts.map(|parts| parts.join("/"))
        })
        .collect();
    videos.sort();
    videos
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Pick the video to show: `*_karaoke.mp4`, then any path mentioning
/// `karaoke`, then the first file
pub fn select_primary_video(videos: &[String]) -> Option<String> {
    videos
        .iter()
        .find(|path| file_name(path).ends_with("_karaoke.mp4"))
        .or_else(|| videos.iter().find(|path| path.contains("karaoke")))
        .or_else(|| videos.first())
        .cloned()
}
