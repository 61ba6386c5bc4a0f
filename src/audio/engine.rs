// The playback engine: transport state machine, decode worker, and the
// bounded frame handoff to the output device. At most one stream is ever
// producing frames; load/stop/seek tear the old one down (token + channel
// teardown, then join) before the next state transition completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::catalog::{Track, TrackId};

use super::output::{DeviceError, OutputSink, RodioOutput, StreamProgress, StreamSource};
use super::pipeline::{FrameBlock, OutputSpec, PipelineError, TrackStream};
use super::AudioConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("no track is loaded")]
    NothingLoaded,
}

/// The one authoritative transport state, snapshotted on demand. Position is
/// computed from the device-side sample counters so a snapshot taken while
/// playing is always current.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Idle,
    Loading(TrackId),
    Playing { track: TrackId, position: Duration },
    Paused { track: TrackId, position: Duration },
    Stopped,
    Failed { track: TrackId, error: PlaybackError },
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStarted(TrackId),
    TrackPaused(TrackId),
    TrackResumed(TrackId),
    TrackStopped(TrackId),
    /// Natural end-of-track; the session may auto-advance.
    TrackFinished(TrackId),
    PlaybackFailed {
        track: TrackId,
        error: PlaybackError,
    },
    VolumeChanged(f32),
}

/// Explicit cancellation handle shared with the decode worker.
#[derive(Clone)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything tied to the currently loaded stream.
struct ActiveStream {
    track: Track,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    progress: StreamProgress,
    /// Set by the worker when mid-stream decoding fails; drained by tick().
    failure: Arc<Mutex<Option<PipelineError>>>,
    /// Position the stream started from (0 on load, the target after a seek).
    base: Duration,
    spec: OutputSpec,
}

impl ActiveStream {
    fn position(&self) -> Duration {
        let frames = self.progress.played_samples() / self.spec.channels.max(1) as u64;
        self.base + Duration::from_secs_f64(frames as f64 / self.spec.sample_rate.max(1) as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Idle,
    Loading(TrackId),
    Playing,
    Paused,
    Stopped,
    Failed { track: TrackId, error: PlaybackError },
}

pub struct PlayerEngine {
    config: AudioConfig,
    output: Box<dyn OutputSink>,
    active: Option<ActiveStream>,
    mode: Mode,
    volume: f32,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl PlayerEngine {
    /// Open the default output device and take sole ownership of it.
    pub fn new(config: AudioConfig) -> Result<Self, PlaybackError> {
        let output = RodioOutput::new()?;
        Ok(Self::with_output(config, Box::new(output)))
    }

    /// Build the engine around any output sink. The engine assumes it is the
    /// sink's only driver.
    pub fn with_output(config: AudioConfig, output: Box<dyn OutputSink>) -> Self {
        let volume = config.volume.clamp(0.0, 1.0);
        Self {
            config,
            output,
            active: None,
            mode: Mode::Idle,
            volume,
            events: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<PlayerEvent>) {
        self.events = Some(sender);
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// Load a track and start playing it from the beginning. Whatever was
    /// playing is stopped first; there is never any overlap.
    pub fn load(&mut self, track: &Track) -> Result<(), PlaybackError> {
        self.teardown_stream();
        self.mode = Mode::Loading(track.id);
        info!(track = %track.id, title = %track.title, "loading track");

        let stream = match TrackStream::open(track, self.config.output_spec()) {
            Ok(stream) => stream,
            Err(e) => {
                let error = PlaybackError::from(e);
                warn!(track = %track.id, error = %error, "load failed");
                self.mode = Mode::Failed {
                    track: track.id,
                    error: error.clone(),
                };
                self.emit(PlayerEvent::PlaybackFailed {
                    track: track.id,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        self.spawn_stream(track.clone(), stream, Duration::ZERO, false)?;
        self.emit(PlayerEvent::TrackStarted(track.id));
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.mode == Mode::Playing {
            self.output.pause();
            self.mode = Mode::Paused;
            if let Some(active) = &self.active {
                debug!(track = %active.track.id, "paused");
                self.emit(PlayerEvent::TrackPaused(active.track.id));
            }
        }
    }

    pub fn resume(&mut self) {
        if self.mode == Mode::Paused {
            self.output.resume();
            self.mode = Mode::Playing;
            if let Some(active) = &self.active {
                debug!(track = %active.track.id, "resumed");
                self.emit(PlayerEvent::TrackResumed(active.track.id));
            }
        }
    }

    pub fn stop(&mut self) {
        if matches!(self.mode, Mode::Playing | Mode::Paused) {
            let track = self.active.as_ref().map(|a| a.track.id);
            self.teardown_stream();
            self.mode = Mode::Stopped;
            if let Some(track) = track {
                debug!(%track, "stopped");
                self.emit(PlayerEvent::TrackStopped(track));
            }
        }
    }

    /// Reposition the current track. The replacement stream is opened and
    /// positioned first and only swapped in on success, so a failed seek
    /// reports the error and leaves state and position untouched. Positions
    /// past end-of-track clamp there; the stream then finishes naturally and
    /// tick() completes the transition to Stopped.
    pub fn seek(&mut self, position: Duration) -> Result<(), PlaybackError> {
        let (track, paused) = match (&self.mode, &self.active) {
            (Mode::Playing, Some(active)) => (active.track.clone(), false),
            (Mode::Paused, Some(active)) => (active.track.clone(), true),
            _ => return Err(PlaybackError::NothingLoaded),
        };

        let mut stream = TrackStream::open(&track, self.config.output_spec())?;
        stream.seek(position)?;
        let base = stream.position();

        self.teardown_stream();
        self.spawn_stream(track, stream, base, paused)?;
        debug!(?position, "seeked");
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.volume = clamped;
        self.output.set_volume(clamped);
        self.emit(PlayerEvent::VolumeChanged(clamped));
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn current_track(&self) -> Option<TrackId> {
        match &self.mode {
            Mode::Playing | Mode::Paused => self.active.as_ref().map(|a| a.track.id),
            Mode::Loading(id) => Some(*id),
            Mode::Failed { track, .. } => Some(*track),
            Mode::Idle | Mode::Stopped => None,
        }
    }

    pub fn position(&self) -> Option<Duration> {
        match self.mode {
            Mode::Playing | Mode::Paused => self.active.as_ref().map(|a| a.position()),
            _ => None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.mode, &self.active) {
            (Mode::Idle, _) => PlaybackState::Idle,
            (Mode::Loading(id), _) => PlaybackState::Loading(*id),
            (Mode::Playing, Some(active)) => PlaybackState::Playing {
                track: active.track.id,
                position: active.position(),
            },
            (Mode::Paused, Some(active)) => PlaybackState::Paused {
                track: active.track.id,
                position: active.position(),
            },
            (Mode::Failed { track, error }, _) => PlaybackState::Failed {
                track: *track,
                error: error.clone(),
            },
            // Playing/Paused with no stream cannot be reached through the
            // transport operations
            (Mode::Stopped, _) | (Mode::Playing | Mode::Paused, None) => PlaybackState::Stopped,
        }
    }

    /// Observe the background side: completes Playing -> Stopped when the
    /// device drained a finished stream, and surfaces worker decode failures
    /// as Failed. Call regularly from the control loop.
    pub fn tick(&mut self) {
        let (track, failure, drained) = match &self.active {
            Some(active) => (
                active.track.id,
                active.failure.lock().unwrap().take(),
                active.progress.is_drained(),
            ),
            None => return,
        };

        if let Some(error) = failure {
            let error = PlaybackError::from(error);
            warn!(%track, error = %error, "stream failed");
            self.teardown_stream();
            self.mode = Mode::Failed {
                track,
                error: error.clone(),
            };
            self.emit(PlayerEvent::PlaybackFailed { track, error });
            return;
        }

        if self.mode == Mode::Playing && drained {
            info!(%track, "track finished");
            self.teardown_stream();
            self.mode = Mode::Stopped;
            self.emit(PlayerEvent::TrackFinished(track));
        }
    }

    fn spawn_stream(
        &mut self,
        track: Track,
        stream: TrackStream,
        base: Duration,
        start_paused: bool,
    ) -> Result<(), PlaybackError> {
        let spec = stream.spec();
        let (tx, rx) = mpsc::channel(self.config.decode_ahead_blocks.max(1));
        let (source, progress) = StreamSource::new(rx, spec);
        let cancel = CancelToken::new();
        let failure = Arc::new(Mutex::new(None));

        let worker = spawn_decode_worker(
            stream,
            tx,
            cancel.clone(),
            failure.clone(),
            self.config.frames_per_block.max(1),
        );

        if let Err(e) = self.output.start(source, self.volume, start_paused) {
            cancel.cancel();
            let _ = worker.join();
            let error = PlaybackError::from(e);
            self.mode = Mode::Failed {
                track: track.id,
                error: error.clone(),
            };
            self.emit(PlayerEvent::PlaybackFailed {
                track: track.id,
                error: error.clone(),
            });
            return Err(error);
        }

        self.active = Some(ActiveStream {
            track,
            cancel,
            worker: Some(worker),
            progress,
            failure,
            base,
            spec,
        });
        self.mode = if start_paused {
            Mode::Paused
        } else {
            Mode::Playing
        };
        Ok(())
    }

    /// Cancel and fully retire the current stream. Joining the worker here is
    /// what guarantees an abandoned stream can never emit another frame.
    fn teardown_stream(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.cancel.cancel();
            self.output.stop();
            if let Some(worker) = active.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for PlayerEngine {
    fn drop(&mut self) {
        self.teardown_stream();
    }
}

fn spawn_decode_worker(
    mut stream: TrackStream,
    tx: mpsc::Sender<FrameBlock>,
    cancel: CancelToken,
    failure: Arc<Mutex<Option<PipelineError>>>,
    frames_per_block: usize,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            if cancel.is_cancelled() {
                trace!("decode worker cancelled");
                return;
            }

            let block = match stream.read_frames(frames_per_block) {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "decode worker failed");
                    *failure.lock().unwrap() = Some(e);
                    return;
                }
            };

            if block.is_empty() {
                // dropping the sender closes the channel; the device side
                // reports drained once the buffered tail is consumed
                trace!("decode worker reached end of stream");
                return;
            }

            let mut pending = Some(block);
            while let Some(block) = pending.take() {
                match tx.try_send(block) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(block)) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        pending = Some(block);
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        }
    })
}
