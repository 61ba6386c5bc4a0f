use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::RawEntry;

/// Walks music directories and turns audio files into raw catalog entries.
#[derive(Clone)]
pub struct MusicScanner {
    supported_extensions: Vec<String>,
}

impl MusicScanner {
    pub fn new() -> Self {
        Self {
            supported_extensions: vec![
                "mp3".to_string(),
                "flac".to_string(),
                "ogg".to_string(),
                "oga".to_string(),
                "mp4".to_string(),
                "m4a".to_string(),
                "aac".to_string(),
                "wav".to_string(),
            ],
        }
    }

    pub fn scan_directory<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RawEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            // Skip hidden files (dotfiles)
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'))
            {
                continue;
            }

            // Skip empty files and anything absurdly large
            if let Ok(metadata) = fs::metadata(path) {
                if metadata.len() == 0 || metadata.len() > 1_000_000_000 {
                    continue;
                }
            }

            if self.is_supported_file(path) {
                match self.entry_from_file(path) {
                    Ok(raw) => entries.push(raw),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping file"),
                }
            }
        }

        Ok(entries)
    }

    pub fn scan_directories(&self, paths: &[PathBuf]) -> Result<Vec<RawEntry>> {
        let mut all_entries = Vec::new();

        for path in paths {
            if path.exists() {
                let mut entries = self.scan_directory(path)?;
                all_entries.append(&mut entries);
            } else {
                debug!(path = %path.display(), "music directory does not exist");
            }
        }

        Ok(all_entries)
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    fn entry_from_file(&self, path: &Path) -> Result<RawEntry> {
        let mut raw = RawEntry::new(path);

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp3") => {
                if let Ok(tag) = id3::Tag::read_from_path(path) {
                    use id3::TagLike;
                    raw.title = tag.title().map(str::to_owned);
                    raw.artist = tag.artist().map(str::to_owned);
                    raw.album = tag.album().map(str::to_owned);
                    raw.duration = tag
                        .duration()
                        .map(|ms| std::time::Duration::from_millis(ms as u64));
                }
            }
            Some("mp4") | Some("m4a") | Some("aac") => {
                if let Ok(tag) = mp4ameta::Tag::read_from_path(path) {
                    raw.title = tag.title().map(str::to_owned);
                    raw.artist = tag.artist().map(str::to_owned);
                    raw.album = tag.album().map(str::to_owned);
                    raw.duration = tag.duration();
                }
            }
            _ => {
                // No tag reader for this container; catalog load falls back
                // to the file stem for the title
            }
        }

        #[cfg(feature = "probe")]
        if raw.duration.is_none() {
            match probe_duration(path) {
                Ok(duration) => raw.duration = Some(duration),
                Err(e) => debug!(path = %path.display(), error = %e, "duration probe failed"),
            }
        }

        Ok(raw)
    }
}

impl Default for MusicScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Deeper duration probing via symphonia, for formats whose tags omit it.
#[cfg(feature = "probe")]
fn probe_duration(path: &Path) -> Result<std::time::Duration> {
    use std::fs::File;
    use std::time::Duration;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("no supported audio tracks found"))?;

    if let (Some(time_base), Some(n_frames)) =
        (track.codec_params.time_base, track.codec_params.n_frames)
    {
        let time = time_base.calc_time(n_frames);
        let duration_secs = time.seconds as f64 + time.frac;
        return Ok(Duration::from_secs_f64(duration_secs));
    }

    Err(anyhow::anyhow!("could not determine duration"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_skips_unsupported_hidden_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("song.mp3"), b"not really audio").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"hidden").unwrap();
        fs::write(dir.path().join("empty.mp3"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let scanner = MusicScanner::new();
        let entries = scanner.scan_directory(dir.path()).unwrap();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("song.mp3"));
        // junk bytes carry no tags; title is left for the catalog fallback
        assert_eq!(entries[0].title, None);
    }

    #[test]
    fn scan_directories_tolerates_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.wav"), b"RIFF").unwrap();

        let scanner = MusicScanner::new();
        let entries = scanner
            .scan_directories(&[dir.path().to_path_buf(), PathBuf::from("/no/such/dir")])
            .unwrap();

        assert_eq!(entries.len(), 1);
    }
}
