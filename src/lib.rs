//! retrocap - retroactive video capture
//!
//! Keeps the most recent encoded video samples in a fixed, preallocated
//! buffer so that a recording started "now" can include the moments just
//! before the request, beginning at a keyframe.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod media;
pub mod sink;

pub use error::{Result, RetroError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
