//! Encoded samples, the sample pool and the retro buffer

mod pool;
mod retro;
mod sample;

pub use pool::SamplePool;
pub use retro::RetroBuffer;
pub use sample::{Sample, SampleSlot};

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Flag bits carried by every encoded sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    /// Independently decodable frame
    pub const KEYFRAME: Self = Self(1);
    /// Codec configuration data (SPS/PPS and friends), not a frame
    pub const CODEC_CONFIG: Self = Self(1 << 1);
    /// Last buffer the encoder will produce
    pub const END_OF_STREAM: Self = Self(1 << 2);

    /// Build flags from raw bits, dropping unknown ones
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & (Self::KEYFRAME.0 | Self::CODEC_CONFIG.0 | Self::END_OF_STREAM.0))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether every bit of `other` is set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_keyframe(&self) -> bool {
        self.contains(Self::KEYFRAME)
    }
}

impl BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Metadata describing one encoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleInfo {
    /// Byte offset of the payload inside the encoder's output buffer
    pub offset: usize,
    /// Payload size in bytes
    pub size: usize,
    /// Presentation timestamp in microseconds
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl SampleInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.is_keyframe()
    }
}

/// Video codec produced by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC
    #[default]
    Avc,
    /// H.265 / HEVC
    Hevc,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "video/avc",
            VideoCodec::Hevc => "video/hevc",
        }
    }

    /// File extension for a raw elementary stream of this codec
    pub fn stream_extension(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "h264",
            VideoCodec::Hevc => "h265",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Output format published by the encoder on format-changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Codec-specific configuration bytes (parameter sets)
    pub codec_config: Vec<u8>,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @{}fps ({} config bytes)",
            self.codec,
            self.width,
            self.height,
            self.frame_rate,
            self.codec_config.len()
        )
    }
}

/// Owned copy of a sample, safe to hand across threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

impl EncodedSample {
    pub fn copy_from(payload: &[u8], info: &SampleInfo) -> Self {
        Self {
            data: payload.to_vec(),
            info: *info,
        }
    }
}
