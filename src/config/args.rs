//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// retrocap - retroactive video capture
///
/// Keeps the last moments of encoded video in memory so a recording can
/// start before it was requested
#[derive(Parser, Debug)]
#[command(name = "retrocap")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Configuration file (default: retrocap.toml next to the executable,
    /// then the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture from the synthetic encoder and save a retroactive recording
    Run {
        /// Seconds of buffering before recording starts
        #[arg(long, default_value = "2")]
        record_after: f64,

        /// Seconds to keep recording
        #[arg(long, default_value = "3")]
        record_for: f64,

        /// Directory for recordings (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Capture frame rate (overrides config)
        #[arg(long)]
        fps: Option<u32>,

        /// Playback frame rate of the recording (overrides config)
        #[arg(long)]
        playback_fps: Option<u32>,

        /// Retro buffer retention in milliseconds (overrides config)
        #[arg(long)]
        retention_ms: Option<u64>,

        /// Frames between keyframes (overrides config)
        #[arg(long)]
        keyframe_interval: Option<u32>,

        /// Frame width (overrides config)
        #[arg(long)]
        width: Option<u32>,

        /// Frame height (overrides config)
        #[arg(long)]
        height: Option<u32>,
    },

    /// Print a sample configuration file
    SampleConfig,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            record_after: 2.0,
            record_for: 3.0,
            output_dir: None,
            fps: None,
            playback_fps: None,
            retention_ms: None,
            keyframe_interval: None,
            width: None,
            height: None,
        }
    }
}
