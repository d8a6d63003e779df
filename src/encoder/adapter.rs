//! Turns encoder events into samples for the capture state machine

use tracing::{debug, error, info, trace};

use super::{EncoderEvent, HardwareEncoder};
use crate::capture::{CaptureMachine, Routed};
use crate::error::{Result, RetroError};
use crate::media::{OutputFormat, SampleFlags, SampleInfo};

/// Outcome of handling one encoder event
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Output format stored; publish it
    FormatChanged(OutputFormat),
    /// Sample copied and routed
    Routed(Routed),
    /// Codec configuration buffer released without producing a sample
    CodecConfig,
    /// Empty buffer released without producing a sample
    Empty,
    /// Event arrived after a fatal error and was dropped
    Ignored,
}

/// Releases an output buffer when dropped
///
/// Every path out of buffer handling, including early returns and errors,
/// goes through the drop, so each index is released exactly once and before
/// the caller sees the result.
struct ReleaseGuard<'a> {
    encoder: &'a mut dyn HardwareEncoder,
    index: usize,
}

impl<'a> ReleaseGuard<'a> {
    fn new(encoder: &'a mut dyn HardwareEncoder, index: usize) -> Self {
        Self { encoder, index }
    }
}

impl<'a> Drop for ReleaseGuard<'a> {
    fn drop(&mut self) {
        trace!("Releasing output buffer {}", self.index);
        self.encoder.release_buffer(self.index);
    }
}

/// Serial handler for the encoder event stream
///
/// Runs on the capture worker. After the first fatal error it halts: later
/// output buffers are released untouched and nothing reaches the machine.
#[derive(Debug, Default)]
pub struct EncoderEventAdapter {
    halted: bool,
}

impl EncoderEventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fatal error stopped dispatch
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Stop dispatch after a fatal error raised outside event handling
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Handle one event
    ///
    /// Returns `Err` exactly once, for the event that ends the session.
    pub fn handle(
        &mut self,
        event: EncoderEvent,
        encoder: &mut dyn HardwareEncoder,
        machine: &mut CaptureMachine,
    ) -> Result<Dispatch> {
        if self.halted {
            if let EncoderEvent::BufferAvailable { index, .. } = event {
                encoder.release_buffer(index);
            }
            debug!("Ignoring encoder event after fatal error");
            return Ok(Dispatch::Ignored);
        }

        let result = match event {
            EncoderEvent::FormatChanged(format) => Self::on_format_changed(format, machine),
            EncoderEvent::BufferAvailable { index, info } => {
                Self::on_buffer_available(encoder, index, info, machine)
            }
            EncoderEvent::InputBufferAvailable { index } => {
                Err(RetroError::UnexpectedInputBuffer { index })
            }
            EncoderEvent::Error(reason) => Err(RetroError::Encoder(reason)),
        };

        if let Err(e) = &result {
            error!("Encoder '{}' failed: {}", encoder.name(), e);
            self.halted = true;
        }

        result
    }

    fn on_format_changed(format: OutputFormat, machine: &mut CaptureMachine) -> Result<Dispatch> {
        info!("Format available: {}", format);
        machine.set_format(format.clone())?;
        Ok(Dispatch::FormatChanged(format))
    }

    fn on_buffer_available(
        encoder: &mut dyn HardwareEncoder,
        index: usize,
        info: SampleInfo,
        machine: &mut CaptureMachine,
    ) -> Result<Dispatch> {
        let mut guard = ReleaseGuard::new(encoder, index);

        if info.flags.contains(SampleFlags::CODEC_CONFIG) {
            debug!("Got codec config");
            return Ok(Dispatch::CodecConfig);
        }

        if info.flags.contains(SampleFlags::END_OF_STREAM) {
            return Err(RetroError::EndOfStream);
        }

        if info.size == 0 {
            trace!("Empty output buffer {}", index);
            return Ok(Dispatch::Empty);
        }

        let buffer = guard
            .encoder
            .output_buffer(index)
            .ok_or(RetroError::BufferUnavailable { index })?;

        let end = info
            .offset
            .checked_add(info.size)
            .filter(|&end| end <= buffer.len())
            .ok_or(RetroError::InvalidBufferRange {
                index,
                offset: info.offset,
                size: info.size,
                len: buffer.len(),
            })?;

        let routed = machine.process(&buffer[info.offset..end], &info)?;
        Ok(Dispatch::Routed(routed))
    }
}
