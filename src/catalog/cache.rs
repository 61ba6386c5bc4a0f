//! Library metadata cache. Tag reads dominate startup on a big library, so
//! scanned entries are persisted as JSON and reused on the next launch.
//! Only metadata is cached, never decoded audio.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use super::RawEntry;

pub fn cache_dir() -> Option<PathBuf> {
    let mut path = dirs::cache_dir()?;
    path.push("minim");

    Some(path)
}

pub fn cache_file() -> Option<PathBuf> {
    let mut path = cache_dir()?;
    path.push("library.json");

    Some(path)
}

pub fn read_cache(path: &Path) -> Result<Vec<RawEntry>> {
    let file = fs::File::open(path)?;
    let entries: Vec<RawEntry> = serde_json::from_reader(std::io::BufReader::new(file))?;
    debug!(entries = entries.len(), "library cache read");

    Ok(entries)
}

pub fn write_cache(path: &Path, entries: &[RawEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), entries)?;
    debug!(entries = entries.len(), "library cache written");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cache_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.json");

        let entries = vec![
            RawEntry {
                path: PathBuf::from("/music/a.mp3"),
                title: Some("Blue".to_string()),
                artist: Some("Someone".to_string()),
                album: None,
                duration: Some(Duration::from_secs(183)),
            },
            RawEntry::new("/music/b.mp3"),
        ];

        write_cache(&path, &entries).unwrap();
        let restored = read_cache(&path).unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn missing_cache_is_an_error_not_a_panic() {
        assert!(read_cache(Path::new("/no/such/cache.json")).is_err());
    }
}
