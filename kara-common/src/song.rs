//! Song catalog entry

use serde::{Deserialize, Serialize};

/// One catalog entry: identity plus the assets found next to it
///
/// `id` is the song's directory name and is unique within one scan.
/// `primary_video`, when present, is always one of `video_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub directory: String,
    pub has_melody: bool,
    pub has_instrumental: bool,
    #[serde(default)]
    pub video_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_video: Option<String>,
}

/// Compact song reference carried by `state` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRef {
    pub id: String,
    pub title: String,
}

impl From<&Song> for SongRef {
    fn from(song: &Song) -> Self {
        Self {
            id: song.id.clone(),
            title: song.title.clone(),
        }
    }
}
