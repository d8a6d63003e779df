//! Sink trait and implementations for encoded sample destinations.
//!
//! A [`SampleSink`] receives forwarded samples in timestamp order. Container
//! formatting and durability are the sink's business; the capture core only
//! calls [`process`](SampleSink::process). Whoever owns the sink decides
//! between [`commit`](SampleSink::commit) and [`discard`](SampleSink::discard)
//! once recording stops.
//!
//! - [`ChannelSink`]: copies samples onto a crossbeam channel
//! - [`FileSink`]: writes a raw elementary stream to a pending file

mod channel;
mod file;

pub use channel::ChannelSink;
pub use file::FileSink;

use crate::error::Result;
use crate::media::{OutputFormat, SampleInfo};

/// A destination for encoded samples.
///
/// `payload` borrows pool storage for the duration of the call only. A sink
/// that keeps data past the call, or hands it to another thread, copies it.
pub trait SampleSink: Send {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Receive the encoder's output format.
    ///
    /// Called before the retroactive flush when the format is already known,
    /// and again whenever the encoder publishes a new format while recording.
    fn set_format(&mut self, _format: &OutputFormat) -> Result<()> {
        Ok(())
    }

    /// Accept one sample. Called once per forwarded sample, in order.
    fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<()>;

    /// Keep what was written.
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    /// Throw away what was written.
    fn discard(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Discard a sink that never became a recording, logging any failure
pub(crate) fn discard_unused(sink: Box<dyn SampleSink>) {
    let name = sink.name().to_string();
    if let Err(e) = sink.discard() {
        tracing::warn!("Failed to discard unused sink '{}': {}", name, e);
    }
}

/// A finished recording handed back to the sink's owner
pub struct Recording {
    sink: Box<dyn SampleSink>,
    samples_written: u64,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

impl Recording {
    pub(crate) fn new(
        sink: Box<dyn SampleSink>,
        samples_written: u64,
        first_pts_us: Option<i64>,
        last_pts_us: Option<i64>,
    ) -> Self {
        Self {
            sink,
            samples_written,
            first_pts_us,
            last_pts_us,
        }
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn first_pts_us(&self) -> Option<i64> {
        self.first_pts_us
    }

    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }

    /// Span between first and last written sample
    pub fn duration_us(&self) -> i64 {
        match (self.first_pts_us, self.last_pts_us) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    pub fn has_content(&self) -> bool {
        self.samples_written > 0
    }

    /// Commit the sink if anything was written, discard it otherwise.
    ///
    /// Returns whether the recording was kept.
    pub fn finish(self) -> Result<bool> {
        if self.has_content() {
            tracing::info!(
                "Saving recording from '{}' ({} samples)",
                self.sink.name(),
                self.samples_written
            );
            self.sink.commit()?;
            Ok(true)
        } else {
            tracing::info!("Discarding empty recording from '{}'", self.sink.name());
            self.sink.discard()?;
            Ok(false)
        }
    }

    /// Take the sink back without committing or discarding.
    pub fn into_sink(self) -> Box<dyn SampleSink> {
        self.sink
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("sink", &self.sink.name())
            .field("samples_written", &self.samples_written)
            .field("first_pts_us", &self.first_pts_us)
            .field("last_pts_us", &self.last_pts_us)
            .finish()
    }
}
