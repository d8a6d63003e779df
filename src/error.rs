//! Unified error types for retrocap

use std::sync::Arc;
use thiserror::Error;

/// Main error type for retrocap operations
///
/// Cloneable so a fatal error can go both to the session listener and to
/// the caller whose request hit it.
#[derive(Error, Debug, Clone)]
pub enum RetroError {
    /// Encoder reported end of stream while the session was still capturing
    #[error("Encoder reached end of stream")]
    EndOfStream,

    /// Encoder reported an error through its event stream
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Encoder announced an output buffer it could not hand out
    #[error("Output buffer {index} is unavailable")]
    BufferUnavailable { index: usize },

    /// Encoder announced an input buffer, but input is fed through a surface
    #[error("Unexpected input buffer {index} (encoder uses surface input)")]
    UnexpectedInputBuffer { index: usize },

    /// Reported offset/size do not fit inside the output buffer
    #[error("Output buffer {index} range {offset}+{size} exceeds buffer length {len}")]
    InvalidBufferRange {
        index: usize,
        offset: usize,
        size: usize,
        len: usize,
    },

    /// Encoded frame larger than the pool's slot capacity
    #[error("Sample of {size} bytes exceeds slot capacity of {capacity} bytes")]
    SampleTooLarge { size: usize, capacity: usize },

    /// Sink failed to accept a sample
    #[error("Sink '{sink}' error: {message}")]
    Sink { sink: String, message: String },

    /// Recording was requested while already recording
    #[error("Capture is already recording")]
    AlreadyRecording,

    /// Session not running
    #[error("Capture session is not running")]
    NotRunning,

    /// Session already running
    #[error("Capture session is already running")]
    AlreadyRunning,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Thread communication error
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// IO error from a sink or the storage layer
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for RetroError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Result type alias for retrocap operations
pub type Result<T> = std::result::Result<T, RetroError>;

impl RetroError {
    /// Create a sink error with context
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Check if this error ends the capture session
    ///
    /// Fatal errors are reported once to the session listener; the worker
    /// stops dispatching samples afterward.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RetroError::EndOfStream
                | RetroError::Encoder(_)
                | RetroError::BufferUnavailable { .. }
                | RetroError::UnexpectedInputBuffer { .. }
                | RetroError::InvalidBufferRange { .. }
                | RetroError::SampleTooLarge { .. }
                | RetroError::Sink { .. }
                | RetroError::Io(_)
        )
    }
}
