//! Buffering/recording state machine

use tracing::{debug, info, trace};

use super::timing::FrameGapTracker;
use super::CaptureConfig;
use crate::error::{Result, RetroError};
use crate::media::{OutputFormat, RetroBuffer, SampleInfo};
use crate::sink::{discard_unused, Recording, SampleSink};

/// Where incoming samples go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Samples only fill the retro buffer
    Buffering,
    /// Samples go straight to the sink
    Recording,
}

/// What happened to a processed sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Stored in the retro buffer
    Buffered,
    /// Written to the recording sink
    Forwarded,
    /// Dropped while the recording waits for its first keyframe
    AwaitingKeyframe,
}

/// Sink currently receiving live samples, with bookkeeping for the result
struct ActiveRecording {
    sink: Box<dyn SampleSink>,
    /// Set when the retroactive flush found no keyframe
    awaiting_keyframe: bool,
    samples_written: u64,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

impl ActiveRecording {
    fn new(sink: Box<dyn SampleSink>) -> Self {
        Self {
            sink,
            awaiting_keyframe: true,
            samples_written: 0,
            first_pts_us: None,
            last_pts_us: None,
        }
    }

    /// Write a sample unless still waiting for a keyframe; returns whether it was written
    fn write(&mut self, payload: &[u8], info: &SampleInfo) -> Result<bool> {
        if self.awaiting_keyframe {
            if !info.is_keyframe() {
                return Ok(false);
            }
            self.awaiting_keyframe = false;
        }

        self.sink.process(payload, info)?;

        self.samples_written += 1;
        self.first_pts_us.get_or_insert(info.presentation_time_us);
        self.last_pts_us = Some(info.presentation_time_us);
        Ok(true)
    }

    fn into_recording(self) -> Recording {
        Recording::new(
            self.sink,
            self.samples_written,
            self.first_pts_us,
            self.last_pts_us,
        )
    }
}

impl SampleSink for ActiveRecording {
    fn name(&self) -> &str {
        self.sink.name()
    }

    fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<()> {
        self.write(payload, info).map(|_| ())
    }
}

enum Route {
    Buffering,
    Recording(ActiveRecording),
}

/// Routes samples to the retro buffer or a live sink
///
/// Not thread-safe by design: every call, including transitions, must come
/// from the one thread that also calls [`process`](CaptureMachine::process).
/// [`CaptureSession`](super::CaptureSession) marshals control requests onto
/// that thread.
pub struct CaptureMachine {
    buffer: RetroBuffer,
    route: Route,
    format: Option<OutputFormat>,
    gaps: FrameGapTracker,
}

impl CaptureMachine {
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_buffer(
            RetroBuffer::new(config.retention_capacity(), config.max_sample_size),
            config.playback_frame_rate,
        )
    }

    /// Machine over an existing buffer; gaps are measured at `playback_frame_rate`
    pub fn with_buffer(buffer: RetroBuffer, playback_frame_rate: u32) -> Self {
        Self {
            buffer,
            route: Route::Buffering,
            format: None,
            gaps: FrameGapTracker::new(playback_frame_rate),
        }
    }

    pub fn state(&self) -> CaptureState {
        match self.route {
            Route::Buffering => CaptureState::Buffering,
            Route::Recording(_) => CaptureState::Recording,
        }
    }

    pub fn buffer(&self) -> &RetroBuffer {
        &self.buffer
    }

    /// Last output format published by the encoder
    pub fn format(&self) -> Option<&OutputFormat> {
        self.format.as_ref()
    }

    /// Frames missing from the encoder output so far
    pub fn skipped_frames(&self) -> u64 {
        self.gaps.skipped_total()
    }

    /// Store a new output format and hand it to the live sink, if any
    pub fn set_format(&mut self, format: OutputFormat) -> Result<()> {
        if let Route::Recording(active) = &mut self.route {
            active.sink.set_format(&format)?;
        }
        self.format = Some(format);
        Ok(())
    }

    /// Route one sample according to the current state
    pub fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<Routed> {
        self.gaps.observe(info.presentation_time_us);

        match &mut self.route {
            Route::Buffering => {
                self.buffer.process(payload, info)?;
                Ok(Routed::Buffered)
            }
            Route::Recording(active) => {
                if active.write(payload, info)? {
                    Ok(Routed::Forwarded)
                } else {
                    trace!(
                        "Dropped pts={} while waiting for keyframe",
                        info.presentation_time_us
                    );
                    Ok(Routed::AwaitingKeyframe)
                }
            }
        }
    }

    /// Buffering -> Recording
    ///
    /// Flushes the retro buffer into `sink` starting at the oldest keyframe,
    /// then routes every later sample straight to the sink. Returns the
    /// number of retroactive samples flushed. If nothing was flushed, live
    /// samples are held back until the next keyframe.
    ///
    /// On error the sink is discarded and the machine stays in Buffering.
    pub fn start_recording(&mut self, mut sink: Box<dyn SampleSink>) -> Result<usize> {
        if matches!(self.route, Route::Recording(_)) {
            discard_unused(sink);
            return Err(RetroError::AlreadyRecording);
        }

        if let Some(format) = &self.format {
            if let Err(e) = sink.set_format(format) {
                discard_unused(sink);
                return Err(e);
            }
        }

        let mut active = ActiveRecording::new(sink);
        let flushed = match self.buffer.drain_from_keyframe(&mut active) {
            Ok(flushed) => flushed,
            Err(e) => {
                discard_unused(active.sink);
                return Err(e);
            }
        };

        info!(
            "Recording to '{}' ({} retroactive samples{})",
            active.sink.name(),
            flushed,
            if flushed == 0 {
                ", waiting for keyframe"
            } else {
                ""
            }
        );

        self.route = Route::Recording(active);
        Ok(flushed)
    }

    /// Recording -> Buffering
    ///
    /// Returns the sink and what was written to it; closing it is up to the
    /// caller. Nothing is drained. Timestamps continue from the encoder, so a
    /// later recording has a gap relative to this one.
    pub fn stop_recording(&mut self) -> Option<Recording> {
        match std::mem::replace(&mut self.route, Route::Buffering) {
            Route::Buffering => {
                debug!("Stop requested while buffering");
                None
            }
            Route::Recording(active) => {
                info!(
                    "Recording to '{}' stopped ({} samples)",
                    active.sink.name(),
                    active.samples_written
                );
                Some(active.into_recording())
            }
        }
    }

    /// Drop everything buffered and restart gap counting
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.gaps.reset();
    }
}

impl std::fmt::Debug for CaptureMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureMachine")
            .field("state", &self.state())
            .field("buffer", &self.buffer)
            .field("format", &self.format)
            .finish()
    }
}
