//! Song catalog
//!
//! Holds the most recent scan of the songs directory. A rescan builds a new
//! list off the async runtime and swaps it in whole, so readers always see
//! either the old list or the new one.

pub mod scanner;

use kara_common::Song;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// In-memory list of discovered songs
pub struct Catalog {
    root: PathBuf,
    songs: RwLock<Arc<Vec<Song>>>,
}

impl Catalog {
    /// Create an empty catalog for `root` (call [`Catalog::refresh`] to fill it)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            songs: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Create a catalog and run the first scan
    pub async fn load(root: impl Into<PathBuf>) -> Self {
        let catalog = Self::new(root);
        catalog.refresh().await;
        catalog
    }

    /// Directory of a song on disk
    pub fn song_dir(&self, song: &Song) -> PathBuf {
        self.root.join(&song.directory)
    }

    /// Rescan the root and swap in the result
    ///
    /// Returns the list now current. If the scan task panics the previous
    /// list is kept.
    pub async fn refresh(&self) -> Arc<Vec<Song>> {
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || scanner::scan(&root)).await {
            Ok(songs) => {
                info!("Catalog loaded {} songs from {}", songs.len(), self.root.display());
                let songs = Arc::new(songs);
                *self.songs.write().await = Arc::clone(&songs);
                songs
            }
            Err(e) => {
                error!("Catalog scan task failed: {}", e);
                self.songs().await
            }
        }
    }

    /// Current song list
    pub async fn songs(&self) -> Arc<Vec<Song>> {
        Arc::clone(&*self.songs.read().await)
    }

    /// Look up a song by id
    pub async fn find(&self, id: &str) -> Option<Song> {
        self.songs.read().await.iter().find(|song| song.id == id).cloned()
    }
}
