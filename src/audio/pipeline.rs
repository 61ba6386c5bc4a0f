// Decode/stream pipeline. A TrackStream normalizes whatever rodio can decode
// to the fixed output format agreed at open, so the engine and the device
// side never branch on source format.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rodio::decoder::DecoderError;
use rodio::source::UniformSourceIterator;
use rodio::{Decoder, Source};
use thiserror::Error;
use tracing::{debug, trace};

use crate::catalog::Track;

/// Output format fixed at pipeline construction. Bit depth is f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("unsupported audio format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("i/o error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
    #[error("decode error in {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },
    #[error("seek to {requested:?} failed: {message}")]
    Seek {
        requested: Duration,
        message: String,
    },
}

/// A block of interleaved sample frames in the pipeline's output format.
/// An empty block marks end-of-track.
#[derive(Debug, Clone)]
pub struct FrameBlock {
    pcm: Vec<f32>,
    spec: OutputSpec,
}

impl FrameBlock {
    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / self.spec.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Frames as `channels`-sized sample slices, one per time instant.
    pub fn frames(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.pcm.chunks_exact(self.spec.channels as usize)
    }

    pub fn samples(&self) -> &[f32] {
        &self.pcm
    }

    pub(crate) fn into_samples(self) -> Vec<f32> {
        self.pcm
    }
}

type NormalizedSource = UniformSourceIterator<Decoder<BufReader<File>>, f32>;

/// An open decode stream for one track, positioned by frame.
pub struct TrackStream {
    path: PathBuf,
    spec: OutputSpec,
    source: NormalizedSource,
    duration: Option<Duration>,
    /// Frames produced since the last seek (or open).
    frames_read: u64,
    /// Position the last seek landed on.
    base: Duration,
    finished: bool,
}

impl std::fmt::Debug for TrackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackStream")
            .field("path", &self.path)
            .field("spec", &self.spec)
            .field("duration", &self.duration)
            .field("frames_read", &self.frames_read)
            .field("base", &self.base)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl TrackStream {
    /// Open a catalog track. The catalog's duration is kept as a fallback for
    /// containers whose decoder cannot report one, which is what makes the
    /// seek clamp policy work for them too.
    pub fn open(track: &Track, spec: OutputSpec) -> Result<Self, PipelineError> {
        let mut stream = Self::open_path(&track.source_path, spec)?;
        if stream.duration.is_none() {
            stream.duration = track.duration;
        }
        Ok(stream)
    }

    pub fn open_path(path: &Path, spec: OutputSpec) -> Result<Self, PipelineError> {
        let (decoder, duration) = open_decoder(path)?;
        let source = UniformSourceIterator::new(decoder, spec.channels, spec.sample_rate);
        debug!(path = %path.display(), ?duration, "stream opened");

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            source,
            duration,
            frames_read: 0,
            base: Duration::ZERO,
            finished: false,
        })
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn position(&self) -> Duration {
        self.base + frames_to_duration(self.frames_read, self.spec.sample_rate)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull up to `max_frames` frames. Returns an empty block at end-of-track
    /// and keeps returning empty blocks afterwards.
    pub fn read_frames(&mut self, max_frames: usize) -> Result<FrameBlock, PipelineError> {
        let channels = self.spec.channels as usize;
        let mut pcm = Vec::with_capacity(max_frames * channels);

        if !self.finished {
            for _ in 0..max_frames * channels {
                match self.source.next() {
                    Some(sample) => pcm.push(sample),
                    None => {
                        self.finished = true;
                        break;
                    }
                }
            }
            // never hand out a ragged tail frame
            pcm.truncate(pcm.len() - pcm.len() % channels);
        }

        self.frames_read += (pcm.len() / channels) as u64;
        trace!(frames = pcm.len() / channels, "frames read");

        Ok(FrameBlock {
            pcm,
            spec: self.spec,
        })
    }

    /// Reposition the decode cursor. Positions at or past a known end-of-track
    /// clamp to the end; the stream then just reports end-of-track. A failed
    /// seek leaves the previous position intact because the replacement
    /// decoder is positioned before any state is swapped.
    pub fn seek(&mut self, position: Duration) -> Result<(), PipelineError> {
        if let Some(duration) = self.duration {
            if position >= duration {
                self.base = duration;
                self.frames_read = 0;
                self.finished = true;
                debug!(?position, ?duration, "seek clamped to end of track");
                return Ok(());
            }
        }

        // seek the bare decoder, then re-wrap; the format converters carry
        // no position state of their own
        let (mut decoder, _) = open_decoder(&self.path)?;
        decoder.try_seek(position).map_err(|e| PipelineError::Seek {
            requested: position,
            message: e.to_string(),
        })?;

        self.source = UniformSourceIterator::new(decoder, self.spec.channels, self.spec.sample_rate);
        self.base = position;
        self.frames_read = 0;
        self.finished = false;
        debug!(?position, "stream repositioned");
        Ok(())
    }
}

fn open_decoder(
    path: &Path,
) -> Result<(Decoder<BufReader<File>>, Option<Duration>), PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| match e {
        DecoderError::UnrecognizedFormat => PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
        },
        other => PipelineError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })?;

    let duration = decoder.total_duration();
    Ok((decoder, duration))
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64)
}

#[cfg(test)]
pub(crate) fn test_block(pcm: Vec<f32>, spec: OutputSpec) -> FrameBlock {
    FrameBlock { pcm, spec }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_sine_wav;

    const SPEC: OutputSpec = OutputSpec {
        sample_rate: 8000,
        channels: 1,
    };

    #[test]
    fn open_missing_file_is_io_error() {
        let err = TrackStream::open_path(Path::new("/no/such/file.wav"), SPEC).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn open_junk_bytes_is_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, b"this is definitely not audio data").unwrap();

        let err = TrackStream::open_path(&path, SPEC).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedFormat { .. } | PipelineError::Decode { .. }
        ));
    }

    #[test]
    fn reads_normalized_frames_until_natural_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, Duration::from_millis(250));

        let mut stream = TrackStream::open_path(&path, SPEC).unwrap();
        assert!(stream.duration().is_some());

        let mut total_frames = 0u64;
        loop {
            let block = stream.read_frames(512).unwrap();
            if block.is_empty() {
                break;
            }
            assert_eq!(block.spec(), SPEC);
            assert!(block.frames().all(|frame| frame.len() == 1));
            total_frames += block.frame_count() as u64;
        }

        // 250ms at 8kHz mono, allow resampler edge slack
        let expected = SPEC.sample_rate as u64 / 4;
        assert!(total_frames.abs_diff(expected) < 64, "got {total_frames}");
        assert!(stream.is_finished());

        // once finished, reads stay empty
        assert!(stream.read_frames(512).unwrap().is_empty());
    }

    #[test]
    fn seek_repositions_and_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, Duration::from_millis(500));

        let mut stream = TrackStream::open_path(&path, SPEC).unwrap();
        stream.read_frames(256).unwrap();
        assert!(stream.position() > Duration::ZERO);

        stream.seek(Duration::from_millis(100)).unwrap();
        assert_eq!(stream.position(), Duration::from_millis(100));
        assert!(!stream.is_finished());

        let block = stream.read_frames(128).unwrap();
        assert!(!block.is_empty());
        assert!(stream.position() > Duration::from_millis(100));
    }

    #[test]
    fn seek_past_end_clamps_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, Duration::from_millis(200));

        let mut stream = TrackStream::open_path(&path, SPEC).unwrap();
        stream.seek(Duration::from_secs(10)).unwrap();
        assert!(stream.is_finished());
        assert_eq!(stream.position(), stream.duration().unwrap());
        assert!(stream.read_frames(512).unwrap().is_empty());
    }
}
