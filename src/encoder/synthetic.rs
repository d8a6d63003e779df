//! Software stand-in for a hardware encoder
//!
//! Produces Annex-B shaped frames at the configured rate with a keyframe
//! every `keyframe_interval_frames`. Output buffers come from a small fixed
//! set and are only reused after the capture worker releases them, the same
//! contract a hardware codec imposes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Delivery, EncoderEvent, EncoderEventSender, EncoderSettings, HardwareEncoder};
use crate::error::{Result, RetroError};
use crate::media::{OutputFormat, SampleFlags, SampleInfo};

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;
const NAL_IDR: u8 = 0x65;
const NAL_SLICE: u8 = 0x41;

/// Keyframes are this many times larger than delta frames
const KEYFRAME_SIZE_FACTOR: usize = 4;

/// How long a blocked send waits before re-checking the stop flag
const SEND_RETRY: Duration = Duration::from_millis(50);

/// Behaviour knobs for [`SyntheticEncoder`]
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    /// Number of output buffers shared with the consumer
    pub output_buffers: usize,
    /// Sleep between frames to match the frame rate
    pub paced: bool,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
    /// Emit an END_OF_STREAM buffer after the last frame
    pub end_of_stream: bool,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            output_buffers: 4,
            paced: true,
            frame_limit: None,
            end_of_stream: false,
        }
    }
}

/// State shared between the producer thread and the consumer side
struct Shared {
    buffers: Mutex<Vec<Vec<u8>>>,
}

/// Encoder producing synthetic frames on a background thread
pub struct SyntheticEncoder {
    options: SyntheticOptions,
    settings: Option<EncoderSettings>,
    shared: Arc<Shared>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
    /// Copy of the buffer being read, so no lock is held across the borrow
    scratch: Vec<u8>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticEncoder {
    pub fn new(options: SyntheticOptions) -> Self {
        let count = options.output_buffers.max(1);
        let (free_tx, free_rx) = unbounded();
        for index in 0..count {
            let _ = free_tx.send(index);
        }

        Self {
            options,
            settings: None,
            shared: Arc::new(Shared {
                buffers: Mutex::new(vec![Vec::new(); count]),
            }),
            free_tx,
            free_rx,
            scratch: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Whether the producer thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Default for SyntheticEncoder {
    fn default() -> Self {
        Self::new(SyntheticOptions::default())
    }
}

impl HardwareEncoder for SyntheticEncoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn configure(&mut self, settings: &EncoderSettings) -> Result<()> {
        if settings.frame_rate == 0 {
            return Err(RetroError::InvalidConfig("frame rate must be positive".into()));
        }

        let frame_bytes = frame_size(settings, true);
        let mut buffers = self.shared.buffers.lock();
        for buffer in buffers.iter_mut() {
            *buffer = Vec::with_capacity(frame_bytes);
        }
        self.scratch = Vec::with_capacity(frame_bytes);

        debug!("Synthetic encoder configured: {}", settings);
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn start(&mut self, events: EncoderEventSender) -> Result<()> {
        if self.handle.is_some() {
            return Err(RetroError::AlreadyRunning);
        }

        let settings = self
            .settings
            .clone()
            .ok_or_else(|| RetroError::InvalidConfig("encoder not configured".into()))?;

        self.stop_flag.store(false, Ordering::SeqCst);

        let producer = Producer {
            settings,
            options: self.options.clone(),
            shared: self.shared.clone(),
            free_rx: self.free_rx.clone(),
            events,
            stop_flag: self.stop_flag.clone(),
        };

        self.handle = Some(thread::spawn(move || producer.run()));
        Ok(())
    }

    fn output_buffer(&mut self, index: usize) -> Option<&[u8]> {
        let buffers = self.shared.buffers.lock();
        let buffer = buffers.get(index)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(buffer);
        drop(buffers);
        Some(self.scratch.as_slice())
    }

    fn release_buffer(&mut self, index: usize) {
        let _ = self.free_tx.send(index);
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer thread state
struct Producer {
    settings: EncoderSettings,
    options: SyntheticOptions,
    shared: Arc<Shared>,
    free_rx: Receiver<usize>,
    events: EncoderEventSender,
    stop_flag: Arc<AtomicBool>,
}

impl Producer {
    fn run(self) {
        info!("Synthetic encoder started: {}", self.settings);

        let format = OutputFormat {
            codec: self.settings.codec,
            width: self.settings.width,
            height: self.settings.height,
            frame_rate: self.settings.playback_frame_rate,
            codec_config: codec_config(&self.settings),
        };

        if !self.deliver(EncoderEvent::FormatChanged(format.clone())) {
            return;
        }

        // Parameter sets also arrive as a flagged output buffer
        if let Some(index) = self.acquire(Duration::from_millis(100)) {
            let size = self.write_buffer(index, &format.codec_config);
            let info = SampleInfo::new(0, size, 0, SampleFlags::CODEC_CONFIG);
            if !self.deliver(EncoderEvent::BufferAvailable { index, info }) {
                return;
            }
        }

        // Paced at the capture rate, stamped in playback time
        let capture_rate = self.settings.frame_rate.max(1) as u64;
        let playback_rate = self.settings.playback_frame_rate.max(1) as u64;
        let interval = Duration::from_micros(1_000_000 / capture_rate);
        let started = Instant::now();
        let mut frame = 0u64;

        while !self.stop_flag.load(Ordering::Relaxed) {
            if self.options.frame_limit.is_some_and(|limit| frame >= limit) {
                break;
            }

            let pts_us = (frame * 1_000_000 / playback_rate) as i64;

            if self.options.paced {
                let due = started + Duration::from_micros(frame * 1_000_000 / capture_rate);
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
            }

            let wait = if self.options.paced {
                interval
            } else {
                SEND_RETRY
            };

            let index = match self.free_rx.recv_timeout(wait) {
                Ok(index) => index,
                Err(RecvTimeoutError::Timeout) => {
                    if self.options.paced {
                        warn!("No free output buffer, dropping frame {}", frame);
                        frame += 1;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let keyframe = frame % self.settings.keyframe_interval_frames.max(1) as u64 == 0;
            let payload = frame_payload(&self.settings, frame, keyframe);
            let size = self.write_buffer(index, &payload);

            let flags = if keyframe {
                SampleFlags::KEYFRAME
            } else {
                SampleFlags::NONE
            };
            let info = SampleInfo::new(0, size, pts_us, flags);

            if !self.deliver(EncoderEvent::BufferAvailable { index, info }) {
                break;
            }
            frame += 1;
        }

        if self.options.end_of_stream && !self.stop_flag.load(Ordering::Relaxed) {
            if let Some(index) = self.acquire(Duration::from_millis(500)) {
                let pts_us = (frame * 1_000_000 / playback_rate) as i64;
                let info = SampleInfo::new(0, 0, pts_us, SampleFlags::END_OF_STREAM);
                self.deliver(EncoderEvent::BufferAvailable { index, info });
            }
        }

        info!("Synthetic encoder stopped after {} frames", frame);
    }

    fn acquire(&self, timeout: Duration) -> Option<usize> {
        self.free_rx.recv_timeout(timeout).ok()
    }

    fn write_buffer(&self, index: usize, bytes: &[u8]) -> usize {
        let mut buffers = self.shared.buffers.lock();
        let buffer = &mut buffers[index];
        buffer.clear();
        buffer.extend_from_slice(bytes);
        bytes.len()
    }

    /// Send an event, giving up only when stopped or disconnected
    fn deliver(&self, event: EncoderEvent) -> bool {
        loop {
            match self.events.send_timeout(event.clone(), SEND_RETRY) {
                Delivery::Sent => return true,
                Delivery::Closed => return false,
                Delivery::TimedOut => {
                    if self.stop_flag.load(Ordering::Relaxed) {
                        return false;
                    }
                }
            }
        }
    }
}

/// Average encoded frame size implied by the bitrate, clamped to the frame area
///
/// Frames are normally long enough for the start code, NAL header and frame
/// number, but never exceed `max_sample_size`, even for tiny frames.
fn frame_size(settings: &EncoderSettings, keyframe: bool) -> usize {
    let per_frame = (settings.bitrate / 8 / settings.frame_rate.max(1) as u64) as usize;
    let size = if keyframe {
        per_frame * KEYFRAME_SIZE_FACTOR
    } else {
        per_frame
    };
    let ceiling = settings.max_sample_size().max(1);
    let floor = (START_CODE.len() + 9).min(ceiling);
    size.clamp(floor, ceiling)
}

fn codec_config(settings: &EncoderSettings) -> Vec<u8> {
    let mut config = Vec::with_capacity(16);
    config.extend_from_slice(&START_CODE);
    config.push(NAL_SPS);
    config.extend_from_slice(&(settings.width as u16).to_be_bytes());
    config.extend_from_slice(&(settings.height as u16).to_be_bytes());
    config.extend_from_slice(&START_CODE);
    config.push(NAL_PPS);
    config
}

/// Start code, NAL header, frame number, then filler up to the frame size
fn frame_payload(settings: &EncoderSettings, frame: u64, keyframe: bool) -> Vec<u8> {
    let size = frame_size(settings, keyframe);
    let mut payload = Vec::with_capacity(size);
    payload.extend_from_slice(&START_CODE);
    payload.push(if keyframe { NAL_IDR } else { NAL_SLICE });
    payload.extend_from_slice(&frame.to_be_bytes());
    payload.resize(size, (frame & 0xff) as u8);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::WorkerMessage;
    use crate::media::VideoCodec;
    use crossbeam_channel::bounded;

    fn settings() -> EncoderSettings {
        EncoderSettings::new(VideoCodec::Avc, 64, 48, 30).with_keyframe_interval(3)
    }

    fn next_event(rx: &Receiver<WorkerMessage>) -> EncoderEvent {
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            WorkerMessage::Encoder(event) => event,
            _ => panic!("expected an encoder event"),
        }
    }

    #[test]
    fn test_start_requires_configure() {
        let (tx, _rx) = bounded(4);
        let mut encoder = SyntheticEncoder::default();

        let err = encoder.start(EncoderEventSender::new(tx)).unwrap_err();
        assert!(matches!(err, RetroError::InvalidConfig(_)));
    }

    #[test]
    fn test_emits_format_config_then_keyframe_cadence() {
        let (tx, rx) = bounded(16);
        let mut encoder = SyntheticEncoder::new(SyntheticOptions {
            paced: false,
            frame_limit: Some(4),
            ..Default::default()
        });
        encoder.configure(&settings()).unwrap();
        encoder.start(EncoderEventSender::new(tx)).unwrap();

        match next_event(&rx) {
            EncoderEvent::FormatChanged(format) => {
                assert_eq!(format.width, 64);
                assert_eq!(&format.codec_config[..5], &[0, 0, 0, 1, NAL_SPS]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut keyframes = Vec::new();
        for _ in 0..5 {
            match next_event(&rx) {
                EncoderEvent::BufferAvailable { index, info } => {
                    let payload = encoder.output_buffer(index).unwrap().to_vec();
                    assert_eq!(payload.len(), info.size);
                    if !info.flags.contains(SampleFlags::CODEC_CONFIG) {
                        keyframes.push(info.is_keyframe());
                        assert_eq!(&payload[..4], &START_CODE);
                    }
                    encoder.release_buffer(index);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(keyframes, vec![true, false, false, true]);
        encoder.stop();
        assert!(!encoder.is_running());
    }

    #[test]
    fn test_unreleased_buffers_stall_unpaced_producer() {
        let (tx, rx) = bounded(16);
        let mut encoder = SyntheticEncoder::new(SyntheticOptions {
            output_buffers: 2,
            paced: false,
            frame_limit: Some(10),
            ..Default::default()
        });
        encoder.configure(&settings()).unwrap();
        encoder.start(EncoderEventSender::new(tx)).unwrap();

        // format + config buffer + one frame, then both buffers are held
        for _ in 0..3 {
            next_event(&rx);
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        encoder.stop();
    }

    #[test]
    fn test_end_of_stream_after_limit() {
        let (tx, rx) = bounded(16);
        let mut encoder = SyntheticEncoder::new(SyntheticOptions {
            paced: false,
            frame_limit: Some(1),
            end_of_stream: true,
            ..Default::default()
        });
        encoder.configure(&settings()).unwrap();
        encoder.start(EncoderEventSender::new(tx)).unwrap();

        let mut last = None;
        for _ in 0..4 {
            if let EncoderEvent::BufferAvailable { index, info } = next_event(&rx) {
                encoder.release_buffer(index);
                last = Some(info);
            }
        }

        let last = last.unwrap();
        assert!(last.flags.contains(SampleFlags::END_OF_STREAM));
        assert_eq!(last.size, 0);
        encoder.stop();
    }

    #[test]
    fn test_tiny_frames_fit_max_sample_size() {
        let settings = EncoderSettings::new(VideoCodec::Avc, 2, 2, 30).with_keyframe_interval(2);
        assert_eq!(settings.max_sample_size(), 4);

        assert_eq!(frame_size(&settings, true), 4);
        assert_eq!(frame_size(&settings, false), 4);
        let payload = frame_payload(&settings, 7, true);
        assert_eq!(payload, START_CODE.to_vec());
    }

    #[test]
    fn test_playback_rate_drives_format_and_timestamps() {
        let (tx, rx) = bounded(16);
        let mut encoder = SyntheticEncoder::new(SyntheticOptions {
            paced: false,
            frame_limit: Some(3),
            ..Default::default()
        });
        encoder
            .configure(&settings().with_playback_rate(5))
            .unwrap();
        encoder.start(EncoderEventSender::new(tx)).unwrap();

        match next_event(&rx) {
            EncoderEvent::FormatChanged(format) => assert_eq!(format.frame_rate, 5),
            other => panic!("unexpected {:?}", other),
        }

        let mut pts = Vec::new();
        for _ in 0..4 {
            if let EncoderEvent::BufferAvailable { index, info } = next_event(&rx) {
                if !info.flags.contains(SampleFlags::CODEC_CONFIG) {
                    pts.push(info.presentation_time_us);
                }
                encoder.release_buffer(index);
            }
        }

        assert_eq!(pts, vec![0, 200_000, 400_000]);
        encoder.stop();
    }
}
