//! retrocap - retroactive video capture CLI

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use retrocap::capture::{CaptureSession, SessionEvent, SessionState};
use retrocap::config::{AppConfig, Args, Command};
use retrocap::encoder::SyntheticEncoder;
use retrocap::media::VideoCodec;
use retrocap::sink::FileSink;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &config)?;

    // Execute command
    match args.command.unwrap_or_default() {
        Command::Run {
            record_after,
            record_for,
            output_dir,
            fps,
            playback_fps,
            retention_ms,
            keyframe_interval,
            width,
            height,
        } => {
            let mut config = config;
            if let Some(dir) = output_dir {
                config.output_dir = dir.to_string_lossy().to_string();
            }
            if let Some(fps) = fps {
                config.frame_rate = fps;
            }
            if let Some(fps) = playback_fps {
                config.playback_frame_rate = fps;
            }
            if let Some(ms) = retention_ms {
                config.min_retention_ms = ms;
            }
            if let Some(frames) = keyframe_interval {
                config.keyframe_interval_frames = frames;
            }
            if let Some(width) = width {
                config.width = width;
            }
            if let Some(height) = height {
                config.height = height;
            }
            cmd_run(
                &config,
                Duration::from_secs_f64(record_after.max(0.0)),
                Duration::from_secs_f64(record_for.max(0.0)),
            )
        }
        Command::SampleConfig => {
            print!("{}", AppConfig::sample_config());
            Ok(())
        }
    }
}

fn init_logging(args: &Args, config: &AppConfig) -> Result<()> {
    // Flags win over the config file
    let level = if args.quiet || args.verbose > 0 {
        args.log_level().to_string()
    } else {
        config.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| Some(config.log_file.clone()).filter(|f| !f.is_empty()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file '{}'", log_file))?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Buffer, record retroactively, and save the result
fn cmd_run(config: &AppConfig, record_after: Duration, record_for: Duration) -> Result<()> {
    println!("retrocap {} - retroactive video capture\n", retrocap::VERSION);

    let capture_config = config.to_capture_config();
    let settings = config.to_encoder_settings();

    let mut session = CaptureSession::new(capture_config);
    let (event_tx, event_rx) = bounded(64);
    session.set_event_channel(event_tx);

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let _ = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    });

    // Start the session
    if let Err(e) = session.start(Box::new(SyntheticEncoder::default()), &settings) {
        error!("Failed to start capture: {}", e);
        return Err(e.into());
    }
    println!("Encoder: {}", settings);
    println!(
        "Keeping {} ms of history ({} samples)\n",
        config.min_retention_ms,
        session.config().retention_capacity()
    );

    let mut outcome = Ok(());

    if wait(record_after, &running, &session, &event_rx) {
        let path = recording_path(&config.output_dir(), config.codec);
        outcome = record(&session, &path, record_for, &running, &event_rx);
    }

    // Stop the session
    if let Some(recording) = session.stop()? {
        warn!("Recording still active at shutdown, saving");
        recording.finish()?;
    }

    let stats = session.stats();
    info!(
        "Buffered {} samples, evicted {}, skipped {} frames",
        stats.samples_buffered, stats.samples_evicted, stats.skipped_frames
    );
    println!("Stopped.");

    outcome
}

fn record(
    session: &CaptureSession,
    path: &Path,
    duration: Duration,
    running: &AtomicBool,
    events: &Receiver<SessionEvent>,
) -> Result<()> {
    let sink = FileSink::create(path)?;
    let flushed = session.start_recording(Box::new(sink))?;
    println!(
        "Recording to {} ({} samples from before the request)",
        path.display(),
        flushed
    );

    wait(duration, running, session, events);

    match session.stop_recording()? {
        Some(recording) => {
            let written = recording.samples_written();
            let span_ms = recording.duration_us() / 1000;
            if recording.finish()? {
                println!("Saved {} samples ({} ms) to {}", written, span_ms, path.display());
            } else {
                println!("Nothing was recorded; no file written.");
            }
        }
        None => warn!("Recording was not active"),
    }

    Ok(())
}

/// Sleep for `duration` while relaying session events
///
/// Returns false when interrupted by Ctrl+C or a session failure.
fn wait(
    duration: Duration,
    running: &AtomicBool,
    session: &CaptureSession,
    events: &Receiver<SessionEvent>,
) -> bool {
    let deadline = Instant::now() + duration;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }

        match events.recv_timeout((deadline - now).min(Duration::from_millis(100))) {
            Ok(SessionEvent::FormatChanged(format)) => println!("Format: {}", format),
            Ok(SessionEvent::Fatal(e)) => {
                error!("Capture failed: {}", e);
                return false;
            }
            Ok(_) | Err(_) => {}
        }

        if session.state() == SessionState::Failed {
            return false;
        }
    }

    false
}

/// `VID_<unix seconds>.<ext>` inside `dir`
fn recording_path(dir: &Path, codec: VideoCodec) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    dir.join(format!("VID_{}.{}", secs, codec.stream_extension()))
}
