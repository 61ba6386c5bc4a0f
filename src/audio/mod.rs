pub mod engine;
pub mod output;
pub mod pipeline;

pub use engine::{PlaybackError, PlaybackState, PlayerEngine, PlayerEvent};
pub use pipeline::{FrameBlock, OutputSpec, PipelineError, TrackStream};

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub volume: f32, // 0.0 to 1.0
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames decoded per block handed to the output side.
    pub frames_per_block: usize,
    /// Bounded decode-ahead: blocks buffered between decode worker and device.
    pub decode_ahead_blocks: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 0.7,
            sample_rate: 44100, // Standard CD quality
            channels: 2,        // Stereo
            frames_per_block: 1024,
            decode_ahead_blocks: 8,
        }
    }
}

impl AudioConfig {
    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}
