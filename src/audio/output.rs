// The device side of playback. StreamSource bridges the bounded frame
// channel to rodio's playback thread; OutputSink is the seam the engine
// drives so the transport logic stays testable without a sound card.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use thiserror::Error;
use tokio::sync::mpsc;

use super::pipeline::{FrameBlock, OutputSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("audio device error: {0}")]
pub struct DeviceError(pub String);

/// Shared, lock-free view of how far the device has consumed a stream.
#[derive(Clone)]
pub struct StreamProgress {
    played_samples: Arc<AtomicU64>,
    drained: Arc<AtomicBool>,
}

impl StreamProgress {
    fn new() -> Self {
        Self {
            played_samples: Arc::new(AtomicU64::new(0)),
            drained: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn played_samples(&self) -> u64 {
        self.played_samples.load(Ordering::Relaxed)
    }

    /// True once the stream ended naturally and every buffered frame was
    /// consumed by the device side.
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }
}

/// Pulls decoded blocks off the bounded channel and feeds them to the device
/// one sample at a time. Blocks the device thread while the channel is empty
/// (underrun) and ends when the decode worker drops its sender.
pub struct StreamSource {
    rx: mpsc::Receiver<FrameBlock>,
    spec: OutputSpec,
    current: Vec<f32>,
    cursor: usize,
    progress: StreamProgress,
}

impl StreamSource {
    pub fn new(rx: mpsc::Receiver<FrameBlock>, spec: OutputSpec) -> (Self, StreamProgress) {
        let progress = StreamProgress::new();
        (
            Self {
                rx,
                spec,
                current: Vec::new(),
                cursor: 0,
                progress: progress.clone(),
            },
            progress,
        )
    }
}

impl Iterator for StreamSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        loop {
            if self.cursor < self.current.len() {
                let sample = self.current[self.cursor];
                self.cursor += 1;
                self.progress.played_samples.fetch_add(1, Ordering::Relaxed);
                return Some(sample);
            }

            match self.rx.blocking_recv() {
                Some(block) => {
                    self.current = block.into_samples();
                    self.cursor = 0;
                }
                None => {
                    self.progress.drained.store(true, Ordering::Release);
                    return None;
                }
            }
        }
    }
}

impl Source for StreamSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // format is fixed for the whole stream
    }

    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// What the engine needs from an output device. Exactly one stream is live at
/// a time; `start` replaces whatever was playing.
pub trait OutputSink {
    fn start(&mut self, source: StreamSource, volume: f32, paused: bool)
        -> Result<(), DeviceError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
}

/// The real device: a rodio output stream plus one sink per loaded track.
pub struct RodioOutput {
    // We need to hold the stream to prevent it from being dropped, even if
    // we don't access it otherwise
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, DeviceError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| DeviceError(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
        })
    }
}

impl OutputSink for RodioOutput {
    fn start(
        &mut self,
        source: StreamSource,
        volume: f32,
        paused: bool,
    ) -> Result<(), DeviceError> {
        if let Some(old) = self.sink.take() {
            old.stop();
        }

        let sink = Sink::try_new(&self.handle).map_err(|e| DeviceError(e.to_string()))?;
        sink.set_volume(volume);
        if paused {
            sink.pause();
        }
        sink.append(source);
        self.sink = Some(sink);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }
}

/// Deviceless sink for tests: drains the source on a plain thread, as fast
/// as the decode side can produce, honoring pause.
#[cfg(test)]
pub(crate) struct NullOutput {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    drain: Option<std::thread::JoinHandle<()>>,
}

#[cfg(test)]
impl NullOutput {
    pub(crate) fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            drain: None,
        }
    }
}

#[cfg(test)]
impl OutputSink for NullOutput {
    fn start(
        &mut self,
        mut source: StreamSource,
        _volume: f32,
        paused: bool,
    ) -> Result<(), DeviceError> {
        self.stop();

        self.paused = Arc::new(AtomicBool::new(paused));
        self.stopped = Arc::new(AtomicBool::new(false));
        let pause_flag = self.paused.clone();
        let stop_flag = self.stopped.clone();

        self.drain = Some(std::thread::spawn(move || loop {
            if stop_flag.load(Ordering::Acquire) {
                break;
            }
            if pause_flag.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            if source.next().is_none() {
                break;
            }
        }));
        Ok(())
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }

    fn set_volume(&mut self, _volume: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(samples: Vec<f32>, spec: OutputSpec) -> FrameBlock {
        crate::audio::pipeline::test_block(samples, spec)
    }

    #[test]
    fn source_reports_spec_counts_samples_and_drains() {
        let spec = OutputSpec {
            sample_rate: 8000,
            channels: 2,
        };
        let (tx, rx) = mpsc::channel(4);
        let (source, progress) = StreamSource::new(rx, spec);

        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 8000);

        tx.try_send(block(vec![0.1, 0.2, 0.3, 0.4], spec)).unwrap();
        drop(tx);

        let consumed: Vec<f32> = source.collect();
        assert_eq!(consumed, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(progress.played_samples(), 4);
        assert!(progress.is_drained());
    }

    #[test]
    fn drained_is_not_set_while_sender_is_alive() {
        let spec = OutputSpec {
            sample_rate: 8000,
            channels: 1,
        };
        let (tx, rx) = mpsc::channel(4);
        let (mut source, progress) = StreamSource::new(rx, spec);

        tx.try_send(block(vec![0.5], spec)).unwrap();
        assert_eq!(source.next(), Some(0.5));
        assert!(!progress.is_drained());
        drop(tx);
        assert_eq!(source.next(), None);
        assert!(progress.is_drained());
    }
}
