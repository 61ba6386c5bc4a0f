// The track catalog - everything else refers to tracks through it.
// Loaded once at startup, swapped atomically on reload.

pub mod cache;
pub mod scanner;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub use scanner::MusicScanner;

/// Opaque, process-unique track handle. Reload mints fresh ids, so handles
/// from before a reload resolve to [`CatalogError::NotFound`] afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A raw catalog entry as produced by the scanner, the metadata cache, or
/// any other caller-owned source. Validation happens in [`CatalogStore::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
}

impl RawEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
            artist: None,
            album: None,
            duration: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub source_path: PathBuf,
    pub duration: Option<Duration>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl Track {
    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or("Unknown Artist")
    }

    /// File name component of the source path, for path-based matching.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn display_duration(&self) -> String {
        match self.duration {
            Some(d) => {
                let secs = d.as_secs();
                format!("{}:{:0>2}", secs / 60, secs % 60)
            }
            None => "-:--".to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("unreadable entry {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },
    #[error("malformed entry: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("track {0} not found")]
    NotFound(TrackId),
}

/// One immutable generation of the catalog. Shared as `Arc<Catalog>` so
/// queries that started before a reload keep a consistent view.
#[derive(Debug, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
    by_id: HashMap<TrackId, usize>,
}

impl Catalog {
    fn from_entries(entries: impl IntoIterator<Item = RawEntry>) -> (Self, Vec<LoadError>) {
        let mut tracks = Vec::new();
        let mut by_id = HashMap::new();
        let mut errors = Vec::new();

        for entry in entries {
            match track_from_entry(entry) {
                Ok(track) => {
                    by_id.insert(track.id, tracks.len());
                    tracks.push(track);
                }
                Err(e) => errors.push(e),
            }
        }

        (Self { tracks, by_id }, errors)
    }

    pub fn get(&self, id: TrackId) -> Result<&Track, CatalogError> {
        self.by_id
            .get(&id)
            .map(|&pos| &self.tracks[pos])
            .ok_or(CatalogError::NotFound(id))
    }

    /// All tracks in insertion order. Restartable: call again for a fresh pass.
    pub fn all(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.iter()
    }

    /// Insertion position of a track, used for ranking tie-breaks.
    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn track_at(&self, position: usize) -> Option<&Track> {
        self.tracks.get(position)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Holds the current catalog generation and swaps it atomically on reload.
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    /// Build a store from raw entries. Bad entries are reported individually
    /// and do not abort the rest of the load.
    pub fn load(entries: impl IntoIterator<Item = RawEntry>) -> (Self, Vec<LoadError>) {
        let (catalog, errors) = Catalog::from_entries(entries);
        info!(
            tracks = catalog.len(),
            skipped = errors.len(),
            "catalog loaded"
        );
        let store = Self {
            current: RwLock::new(Arc::new(catalog)),
        };
        (store, errors)
    }

    /// Replace the catalog wholesale. Queries holding a snapshot keep the old
    /// generation; everything resolved through the store afterwards sees only
    /// the new one, and old ids answer `NotFound`.
    pub fn reload(&self, entries: impl IntoIterator<Item = RawEntry>) -> Vec<LoadError> {
        let (catalog, errors) = Catalog::from_entries(entries);
        debug!(tracks = catalog.len(), "catalog reloaded");
        *self.current.write().unwrap() = Arc::new(catalog);
        errors
    }

    /// Consistent point-in-time view for queries.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().unwrap().clone()
    }

    pub fn get(&self, id: TrackId) -> Result<Track, CatalogError> {
        self.snapshot().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

fn track_from_entry(entry: RawEntry) -> Result<Track, LoadError> {
    let file_name = entry
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            LoadError::Malformed(format!("entry has no file name: {}", entry.path.display()))
        })?;

    match fs::metadata(&entry.path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(LoadError::Unreadable {
                path: entry.path,
                message: "not a regular file".to_string(),
            })
        }
        Err(e) => {
            return Err(LoadError::Unreadable {
                path: entry.path,
                message: e.to_string(),
            })
        }
    }

    // Fall back to the file stem when tags carry no usable title
    let title = entry
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| {
            entry
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_owned)
                .unwrap_or(file_name)
        });

    Ok(Track {
        id: TrackId::new(),
        title,
        source_path: entry.path,
        duration: entry.duration,
        artist: entry.artist,
        album: entry.album,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    #[test]
    fn load_keeps_insertion_order_and_reports_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.mp3");
        let b = touch(dir.path(), "b.mp3");

        let entries = vec![
            RawEntry::new(&a).with_title("Blue"),
            RawEntry::new(dir.path().join("missing.mp3")),
            RawEntry::new(&b).with_title("Glue"),
        ];

        let (store, errors) = CatalogStore::load(entries);
        assert_eq!(store.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], LoadError::Unreadable { .. }));

        let titles: Vec<_> = store.snapshot().all().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["Blue", "Glue"]);
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "untitled song.mp3");

        let (store, errors) = CatalogStore::load(vec![RawEntry::new(&path)]);
        assert!(errors.is_empty());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.all().next().unwrap().title, "untitled song");
    }

    #[test]
    fn get_by_stale_id_is_not_found_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.mp3");

        let (store, _) = CatalogStore::load(vec![RawEntry::new(&a).with_title("Blue")]);
        let old_id = store.snapshot().all().next().unwrap().id;
        assert!(store.get(old_id).is_ok());

        store.reload(vec![RawEntry::new(&a).with_title("Blue")]);
        assert!(matches!(
            store.get(old_id),
            Err(CatalogError::NotFound(id)) if id == old_id
        ));
    }

    #[test]
    fn snapshots_survive_reload_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.mp3");
        let b = touch(dir.path(), "b.mp3");

        let (store, _) = CatalogStore::load(vec![RawEntry::new(&a).with_title("Blue")]);
        let before = store.snapshot();
        let old_id = before.all().next().unwrap().id;

        store.reload(vec![
            RawEntry::new(&a).with_title("Blue"),
            RawEntry::new(&b).with_title("Glue"),
        ]);

        // the pre-reload snapshot still resolves its own ids
        assert!(before.get(old_id).is_ok());
        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn malformed_entry_is_rejected() {
        let (_store, errors) = CatalogStore::load(vec![RawEntry::new("/")]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], LoadError::Malformed(_)));
    }
}
