//! Capture core: state machine, session worker and timing checks

mod session;
mod state;
mod timing;

pub use session::{CaptureSession, CaptureStats, SessionEvent, SessionState};
pub use state::{CaptureMachine, CaptureState, Routed};
pub use timing::FrameGapTracker;

use std::time::Duration;

use crossbeam_channel::Sender;

use crate::encoder::EncoderEvent;
use crate::error::{Result, RetroError};
use crate::sink::{Recording, SampleSink};

/// Retention used when nothing else is configured
pub const DEFAULT_RETENTION: Duration = Duration::from_millis(50);

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Frames captured per second; sizes the retro buffer
    pub frame_rate: u32,
    /// Frames per second of the encoded stream; timestamps advance at this rate
    pub playback_frame_rate: u32,
    /// How much history the retro buffer keeps
    pub min_retention: Duration,
    /// Capacity of each pooled sample
    pub max_sample_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            playback_frame_rate: 30,
            min_retention: DEFAULT_RETENTION,
            max_sample_size: 640 * 480,
        }
    }
}

impl CaptureConfig {
    /// Number of samples needed to cover `min_retention`, at least one
    pub fn retention_capacity(&self) -> usize {
        let frames = (self.frame_rate as f64 * self.min_retention.as_secs_f64()).ceil();
        (frames as usize).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            return Err(RetroError::InvalidConfig("frame rate must be positive".into()));
        }
        if self.playback_frame_rate == 0 {
            return Err(RetroError::InvalidConfig(
                "playback frame rate must be positive".into(),
            ));
        }
        if self.min_retention.is_zero() {
            return Err(RetroError::InvalidConfig("retention must be positive".into()));
        }
        if self.max_sample_size == 0 {
            return Err(RetroError::InvalidConfig("max sample size must be positive".into()));
        }
        Ok(())
    }
}

/// Everything the capture worker acts on, in arrival order
pub(crate) enum WorkerMessage {
    Encoder(EncoderEvent),
    StartRecording(Box<dyn SampleSink>, Sender<Result<usize>>),
    StopRecording(Sender<Option<Recording>>),
    ClearBuffer,
    Shutdown,
}
