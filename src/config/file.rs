//! Configuration file support

use crate::capture::CaptureConfig;
use crate::encoder::{EncoderSettings, DEFAULT_KEYFRAME_INTERVAL_FRAMES};
use crate::media::VideoCodec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "retrocap.toml";

/// Application configuration loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture frame rate
    pub frame_rate: u32,

    /// Playback frame rate of the recorded stream (0 = same as frame_rate)
    pub playback_frame_rate: u32,

    /// How much encoded history to keep, in milliseconds
    pub min_retention_ms: u64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Largest encoded frame accepted, in bytes (0 = width * height)
    pub max_sample_size: usize,

    /// Frames between keyframes (1 = every frame)
    pub keyframe_interval_frames: u32,

    /// Video codec (avc, hevc)
    pub codec: VideoCodec,

    /// Directory recordings are written to (empty = current directory)
    pub output_dir: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            playback_frame_rate: 0,
            min_retention_ms: 50,
            width: 640,
            height: 480,
            max_sample_size: 0,
            keyframe_interval_frames: DEFAULT_KEYFRAME_INTERVAL_FRAMES,
            codec: VideoCodec::Avc,
            output_dir: String::new(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: retrocap.toml
    /// 2. User config directory: retrocap/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// First existing config file in the default search order
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join(CONFIG_FILE_NAME);
                if config_path.exists() {
                    return Some(config_path);
                }
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("retrocap").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Directory for recordings
    pub fn output_dir(&self) -> PathBuf {
        if self.output_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.output_dir)
        }
    }

    /// Playback rate with the capture rate as fallback
    pub fn playback_frame_rate(&self) -> u32 {
        if self.playback_frame_rate > 0 {
            self.playback_frame_rate
        } else {
            self.frame_rate
        }
    }

    /// Convert to EncoderSettings, filling derived defaults
    pub fn to_encoder_settings(&self) -> EncoderSettings {
        EncoderSettings::new(self.codec, self.width, self.height, self.frame_rate)
            .with_playback_rate(self.playback_frame_rate())
            .with_keyframe_interval(self.keyframe_interval_frames)
    }

    /// Convert to CaptureConfig
    pub fn to_capture_config(&self) -> CaptureConfig {
        let max_sample_size = if self.max_sample_size > 0 {
            self.max_sample_size
        } else {
            self.to_encoder_settings().max_sample_size()
        };

        CaptureConfig {
            frame_rate: self.frame_rate,
            playback_frame_rate: self.playback_frame_rate(),
            min_retention: Duration::from_millis(self.min_retention_ms),
            max_sample_size,
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# retrocap configuration

# Capture frame rate (default: 30)
frame_rate = 30

# Playback frame rate of recordings; lower than frame_rate for slow motion
# (0 = same as frame_rate)
playback_frame_rate = 0

# Encoded history kept in memory, in milliseconds (default: 50)
# Recordings start from the oldest keyframe inside this window
min_retention_ms = 50

# Frame size in pixels
width = 640
height = 480

# Largest encoded frame accepted, in bytes (0 = width * height)
max_sample_size = 0

# Frames between keyframes (default: 1 = every frame)
# Recordings can only start at a keyframe, so keep this within the
# retention window or the retroactive part may come out empty
keyframe_interval_frames = 1

# Video codec: avc, hevc
codec = "avc"

# Directory recordings are written to (empty = current directory)
output_dir = ""

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    Io {
        path: String,
        source: std::io::Error,
    },
    /// Error parsing TOML
    Parse {
        path: String,
        source: toml::de::Error,
    },
    /// Error serializing config
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to access config file '{}': {}", path, source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path, source)
            }
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureMachine;
    use crate::media::{SampleFlags, SampleInfo};
    use crate::sink::tests::CollectingSink;

    #[test]
    fn test_sample_config_parses_to_defaults() {
        let parsed: AppConfig = toml::from_str(&AppConfig::sample_config()).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str("frame_rate = 60\ncodec = \"hevc\"").unwrap();
        assert_eq!(parsed.frame_rate, 60);
        assert_eq!(parsed.codec, VideoCodec::Hevc);
        assert_eq!(parsed.min_retention_ms, 50);
    }

    #[test]
    fn test_derived_capture_config() {
        let config = AppConfig {
            width: 320,
            height: 240,
            min_retention_ms: 2000,
            ..Default::default()
        };

        let capture = config.to_capture_config();
        assert_eq!(capture.max_sample_size, 320 * 240);
        assert_eq!(capture.min_retention, Duration::from_secs(2));
        assert_eq!(capture.retention_capacity(), 60);

        let explicit = AppConfig {
            max_sample_size: 1024,
            ..config
        };
        assert_eq!(explicit.to_capture_config().max_sample_size, 1024);
    }

    #[test]
    fn test_keyframe_interval_default_is_every_frame() {
        let config = AppConfig::default();
        assert_eq!(config.to_encoder_settings().keyframe_interval_frames, 1);

        let config = AppConfig {
            keyframe_interval_frames: 10,
            ..Default::default()
        };
        assert_eq!(config.to_encoder_settings().keyframe_interval_frames, 10);
    }

    #[test]
    fn test_default_config_always_flushes_history() {
        let config = AppConfig::default();
        let interval = config.to_encoder_settings().keyframe_interval_frames as i64;

        for frames in 1..=90i64 {
            let mut machine = CaptureMachine::new(&config.to_capture_config());
            for n in 0..frames {
                let flags = if n % interval == 0 {
                    SampleFlags::KEYFRAME
                } else {
                    SampleFlags::NONE
                };
                machine
                    .process(&[n as u8], &SampleInfo::new(0, 1, n * 33_333, flags))
                    .unwrap();
            }

            let flushed = machine
                .start_recording(Box::new(CollectingSink::default()))
                .unwrap();
            assert!(flushed >= 1, "nothing flushed after {} frames", frames);
        }
    }

    #[test]
    fn test_playback_rate_falls_back_to_capture_rate() {
        let config = AppConfig::default();
        assert_eq!(config.to_encoder_settings().playback_frame_rate, 30);
        assert_eq!(config.to_capture_config().playback_frame_rate, 30);

        let slow_motion = AppConfig {
            frame_rate: 240,
            playback_frame_rate: 5,
            ..Default::default()
        };
        let settings = slow_motion.to_encoder_settings();
        assert_eq!(settings.frame_rate, 240);
        assert_eq!(settings.playback_frame_rate, 5);
        assert_eq!(slow_motion.to_capture_config().playback_frame_rate, 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("retrocap.toml");
        let config = AppConfig {
            frame_rate: 24,
            output_dir: "/videos".into(),
            ..Default::default()
        };

        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "frame_rate = \"fast\"").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
