//! Hardware encoder collaborator: settings, events and the event adapter

mod adapter;
mod synthetic;

pub use adapter::{Dispatch, EncoderEventAdapter};
pub use synthetic::{SyntheticEncoder, SyntheticOptions};

#[cfg(test)]
pub(crate) use adapter::tests::MockEncoder;

use crate::capture::WorkerMessage;
use crate::error::Result;
use crate::media::{OutputFormat, SampleInfo, VideoCodec};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::time::Duration;
use tracing::debug;

/// Ratio of raw frame bytes to encoded bytes used for the default bitrate
const COMPRESSION_RATIO: u64 = 5;

/// Every frame is a keyframe, so any retained window can start a recording
pub const DEFAULT_KEYFRAME_INTERVAL_FRAMES: u32 = 1;

/// Event delivered by the encoder on its callback thread
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// New output format; codec configuration is attached
    FormatChanged(OutputFormat),
    /// Output buffer `index` holds encoded data described by `info`
    BufferAvailable { index: usize, info: SampleInfo },
    /// Input buffer announced; never expected with surface input
    InputBufferAvailable { index: usize },
    /// Encoder failure
    Error(String),
}

/// Encoder configuration passed to [`HardwareEncoder::configure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Frames captured per second
    pub frame_rate: u32,
    /// Frames per second written into the stream; lower than `frame_rate`
    /// for slow motion
    pub playback_frame_rate: u32,
    /// Target bitrate in bits per second
    pub bitrate: u64,
    /// Frames between keyframes
    pub keyframe_interval_frames: u32,
}

impl EncoderSettings {
    /// Settings with a bitrate derived from the frame area and every frame a keyframe
    ///
    /// Playback runs at the capture rate until [`with_playback_rate`](Self::with_playback_rate)
    /// says otherwise.
    pub fn new(codec: VideoCodec, width: u32, height: u32, frame_rate: u32) -> Self {
        let area = width as u64 * height as u64;
        Self {
            codec,
            width,
            height,
            frame_rate,
            playback_frame_rate: frame_rate,
            bitrate: frame_rate as u64 * area / COMPRESSION_RATIO,
            keyframe_interval_frames: DEFAULT_KEYFRAME_INTERVAL_FRAMES,
        }
    }

    pub fn with_keyframe_interval(mut self, frames: u32) -> Self {
        self.keyframe_interval_frames = frames.max(1);
        self
    }

    pub fn with_playback_rate(mut self, frame_rate: u32) -> Self {
        self.playback_frame_rate = frame_rate;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Worst-case size of one encoded frame
    pub fn max_sample_size(&self) -> usize {
        self.area()
    }

    /// Keyframe interval in seconds of playback, as encoders usually take it
    pub fn keyframe_interval_secs(&self) -> f32 {
        self.keyframe_interval_frames as f32 / self.playback_frame_rate.max(1) as f32
    }
}

impl std::fmt::Display for EncoderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @{}fps (playback {}fps), {} kbps, keyframe every {} frames",
            self.codec,
            self.width,
            self.height,
            self.frame_rate,
            self.playback_frame_rate,
            self.bitrate / 1000,
            self.keyframe_interval_frames
        )
    }
}

/// Handle the encoder uses to deliver events to the capture worker
///
/// Cheap to clone. Once the session is torn down, sends are dropped and
/// reported as `false`.
#[derive(Clone)]
pub struct EncoderEventSender {
    tx: Sender<WorkerMessage>,
}

impl EncoderEventSender {
    pub(crate) fn new(tx: Sender<WorkerMessage>) -> Self {
        Self { tx }
    }

    /// Deliver an event, blocking while the worker queue is full
    pub fn send(&self, event: EncoderEvent) -> bool {
        match self.tx.send(WorkerMessage::Encoder(event)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Capture worker gone, dropping encoder event");
                false
            }
        }
    }

    /// Deliver an event, waiting at most `timeout` for queue space
    pub fn send_timeout(&self, event: EncoderEvent, timeout: Duration) -> Delivery {
        match self.tx.send_timeout(WorkerMessage::Encoder(event), timeout) {
            Ok(()) => Delivery::Sent,
            Err(SendTimeoutError::Timeout(_)) => Delivery::TimedOut,
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("Capture worker gone, dropping encoder event");
                Delivery::Closed
            }
        }
    }
}

/// Result of [`EncoderEventSender::send_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue stayed full; the event was not delivered
    TimedOut,
    /// Worker is gone; the event was dropped
    Closed,
}

/// The hardware encoder as seen by the capture core
///
/// `configure` and `start` run on the caller's thread; after that the
/// encoder is moved to the capture worker, which calls `output_buffer`,
/// `release_buffer` and `stop`.
pub trait HardwareEncoder: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Apply settings before starting.
    fn configure(&mut self, settings: &EncoderSettings) -> Result<()>;

    /// Begin producing events on `events`.
    fn start(&mut self, events: EncoderEventSender) -> Result<()>;

    /// Contents of output buffer `index`, valid until it is released.
    fn output_buffer(&mut self, index: usize) -> Option<&[u8]>;

    /// Return output buffer `index` to the encoder.
    fn release_buffer(&mut self, index: usize);

    /// Stop producing events.
    fn stop(&mut self) {}
}
