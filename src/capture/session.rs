//! Capture session - owns the worker that serializes encoder events and control requests

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{CaptureConfig, CaptureMachine, CaptureState, Routed, WorkerMessage};
use crate::encoder::{
    Dispatch, EncoderEvent, EncoderEventAdapter, EncoderEventSender, EncoderSettings,
    HardwareEncoder,
};
use crate::error::{Result, RetroError};
use crate::media::OutputFormat;
use crate::sink::{discard_unused, Recording, SampleSink};

/// Depth of the worker queue shared by encoder events and control requests
const WORKER_QUEUE_DEPTH: usize = 64;

/// How long a control request waits for the worker by default
const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, encoder not started
    Idle,
    /// Worker running and accepting samples
    Running,
    /// A fatal error stopped sample processing; call `stop` to tear down
    Failed,
    /// Torn down
    Stopped,
}

/// Notifications for an external listener
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Encoder published its output format
    FormatChanged(OutputFormat),
    /// Recording began; `flushed` retroactive samples went to the sink
    RecordingStarted { flushed: usize },
    /// Recording ended
    RecordingStopped { samples_written: u64 },
    /// The session failed; sent at most once
    Fatal(RetroError),
}

/// Counters maintained by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Samples stored in the retro buffer
    pub samples_buffered: u64,
    /// Live samples written to a recording sink
    pub samples_forwarded: u64,
    /// Live samples dropped while a recording waited for a keyframe
    pub samples_awaiting_keyframe: u64,
    /// Retroactive samples flushed at recording start
    pub samples_flushed: u64,
    /// Samples evicted from a full retro buffer
    pub samples_evicted: u64,
    /// Samples currently held in the retro buffer
    pub retained: usize,
    /// Frames missing from the encoder output
    pub skipped_frames: u64,
    /// Recordings started
    pub recordings: u64,
}

/// State shared between the session handle and its worker
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SessionState>>,
    capture_state: Arc<Mutex<CaptureState>>,
    format: Arc<Mutex<Option<OutputFormat>>>,
    stats: Arc<Mutex<CaptureStats>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            capture_state: Arc::new(Mutex::new(CaptureState::Buffering)),
            format: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(CaptureStats::default())),
        }
    }
}

/// Retroactive capture session
///
/// Starts a [`HardwareEncoder`], runs a worker that feeds its output through
/// the [`CaptureMachine`], and lets callers switch between buffering and
/// recording from any thread. Every request is queued behind the encoder
/// events already delivered, so the machine only ever sees one thread.
pub struct CaptureSession {
    config: CaptureConfig,
    shared: Shared,
    worker_tx: Option<Sender<WorkerMessage>>,
    worker_handle: Option<JoinHandle<Option<Recording>>>,
    // Event notification channel for external listeners
    event_tx: Option<Sender<SessionEvent>>,
    control_timeout: Duration,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            shared: Shared::new(),
            worker_tx: None,
            worker_handle: None,
            event_tx: None,
            control_timeout: CONTROL_TIMEOUT,
        }
    }

    /// How long control requests wait to be queued and answered
    pub fn set_control_timeout(&mut self, timeout: Duration) {
        self.control_timeout = timeout;
    }

    /// Set an event notification channel
    ///
    /// Takes effect at the next `start`. Events are dropped when the
    /// channel is full.
    pub fn set_event_channel(&mut self, tx: Sender<SessionEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Buffering or recording, as last seen by the worker
    pub fn capture_state(&self) -> CaptureState {
        *self.shared.capture_state.lock()
    }

    /// Output format, once the encoder has published one
    pub fn format(&self) -> Option<OutputFormat> {
        self.shared.format.lock().clone()
    }

    pub fn stats(&self) -> CaptureStats {
        *self.shared.stats.lock()
    }

    /// Configure and start `encoder`, then begin buffering its output
    pub fn start(
        &mut self,
        mut encoder: Box<dyn HardwareEncoder>,
        settings: &EncoderSettings,
    ) -> Result<()> {
        if matches!(self.state(), SessionState::Running | SessionState::Failed) {
            return Err(RetroError::AlreadyRunning);
        }

        self.config.validate()?;
        if settings.frame_rate != self.config.frame_rate {
            warn!(
                "Encoder frame rate {} differs from capture frame rate {}",
                settings.frame_rate, self.config.frame_rate
            );
        }
        if settings.playback_frame_rate != self.config.playback_frame_rate {
            warn!(
                "Encoder playback rate {} differs from capture playback rate {}",
                settings.playback_frame_rate, self.config.playback_frame_rate
            );
        }
        if settings.keyframe_interval_frames as usize > self.config.retention_capacity() {
            warn!(
                "Keyframe interval of {} frames exceeds the {} retained samples; recordings may start without history",
                settings.keyframe_interval_frames,
                self.config.retention_capacity()
            );
        }

        info!("Starting capture session...");

        let (tx, rx) = bounded::<WorkerMessage>(WORKER_QUEUE_DEPTH);

        encoder.configure(settings)?;
        encoder.start(EncoderEventSender::new(tx.clone()))?;
        info!("Encoder '{}' started: {}", encoder.name(), settings);

        let machine = CaptureMachine::new(&self.config);
        info!(
            "Retro buffer holds {} samples of up to {} bytes",
            machine.buffer().capacity(),
            machine.buffer().sample_capacity()
        );

        self.shared = Shared::new();
        *self.shared.state.lock() = SessionState::Running;
        let worker_shared = self.shared.clone();
        let worker_events = self.event_tx.clone();

        self.worker_handle = Some(thread::spawn(move || {
            capture_worker(encoder, machine, rx, worker_shared, worker_events)
        }));
        self.worker_tx = Some(tx);

        info!("Capture session started");
        Ok(())
    }

    /// Buffering -> Recording
    ///
    /// Returns the number of retroactive samples flushed into `sink`. When
    /// this returns an error the sink has been discarded, even on timeout.
    pub fn start_recording(&self, sink: Box<dyn SampleSink>) -> Result<usize> {
        if self.state() != SessionState::Running {
            discard_unused(sink);
            return Err(RetroError::NotRunning);
        }

        // Zero capacity: a reply is only delivered while this call still waits
        let (reply_tx, reply_rx) = bounded(0);
        match self.deliver(WorkerMessage::StartRecording(sink, reply_tx)) {
            Ok(()) => {}
            Err((e, WorkerMessage::StartRecording(sink, _))) => {
                discard_unused(sink);
                return Err(e);
            }
            Err((e, _)) => return Err(e),
        }
        self.await_reply(&reply_rx)?
    }

    /// Recording -> Buffering
    ///
    /// Returns the recording so the caller can commit or discard it; `None`
    /// when nothing was recording. Also works after a fatal error, so a
    /// half-written recording can still be cleaned up.
    pub fn stop_recording(&self) -> Result<Option<Recording>> {
        let (reply_tx, reply_rx) = bounded(0);
        self.request_any(WorkerMessage::StopRecording(reply_tx))?;
        self.await_reply(&reply_rx)
    }

    /// Drop everything retained so far
    pub fn clear_buffer(&self) -> Result<()> {
        self.request(WorkerMessage::ClearBuffer)
    }

    /// Stop the encoder and the worker
    ///
    /// Returns a recording that was still active, untouched.
    pub fn stop(&mut self) -> Result<Option<Recording>> {
        let Some(tx) = self.worker_tx.take() else {
            return Ok(None);
        };

        info!("Stopping capture session...");

        if tx.send_timeout(WorkerMessage::Shutdown, self.control_timeout).is_err() {
            warn!("Capture worker did not accept shutdown request");
        }
        drop(tx);

        let pending = match self.worker_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RetroError::ChannelError("capture worker panicked".into()))?,
            None => None,
        };

        *self.shared.state.lock() = SessionState::Stopped;
        *self.shared.capture_state.lock() = CaptureState::Buffering;
        info!("Capture session stopped");

        Ok(pending)
    }

    /// Send a request that only makes sense while samples are processed
    fn request(&self, message: WorkerMessage) -> Result<()> {
        if self.state() != SessionState::Running {
            return Err(RetroError::NotRunning);
        }
        self.request_any(message)
    }

    fn request_any(&self, message: WorkerMessage) -> Result<()> {
        self.deliver(message).map_err(|(e, _)| e)
    }

    /// Queue a message, handing it back when the worker cannot take it
    fn deliver(
        &self,
        message: WorkerMessage,
    ) -> std::result::Result<(), (RetroError, WorkerMessage)> {
        let Some(tx) = self.worker_tx.as_ref() else {
            return Err((RetroError::NotRunning, message));
        };
        tx.send_timeout(message, self.control_timeout).map_err(|e| {
            let error = RetroError::ChannelError(format!("capture worker unavailable: {}", e));
            (error, e.into_inner())
        })
    }

    fn await_reply<T>(&self, rx: &Receiver<T>) -> Result<T> {
        rx.recv_timeout(self.control_timeout)
            .map_err(|e| RetroError::ChannelError(format!("no reply from capture worker: {}", e)))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        match self.stop() {
            Ok(Some(recording)) => {
                warn!("Session dropped while recording, discarding");
                if let Err(e) = recording.into_sink().discard() {
                    error!("Failed to discard recording: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to stop capture session: {}", e),
        }
    }
}

/// Worker-side view of the session
struct Worker {
    machine: CaptureMachine,
    adapter: EncoderEventAdapter,
    shared: Shared,
    event_tx: Option<Sender<SessionEvent>>,
    fatal_sent: bool,
}

impl Worker {
    fn notify(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                debug!("Session listener not keeping up, event dropped");
            }
        }
    }

    fn fail(&mut self, error: RetroError) {
        self.adapter.halt();
        *self.shared.state.lock() = SessionState::Failed;
        if !self.fatal_sent {
            self.fatal_sent = true;
            self.notify(SessionEvent::Fatal(error));
        }
    }

    fn on_encoder_event(&mut self, event: EncoderEvent, encoder: &mut dyn HardwareEncoder) {
        match self.adapter.handle(event, encoder, &mut self.machine) {
            Ok(Dispatch::FormatChanged(format)) => {
                *self.shared.format.lock() = Some(format.clone());
                self.notify(SessionEvent::FormatChanged(format));
            }
            Ok(Dispatch::Routed(routed)) => {
                let mut stats = self.shared.stats.lock();
                match routed {
                    Routed::Buffered => stats.samples_buffered += 1,
                    Routed::Forwarded => stats.samples_forwarded += 1,
                    Routed::AwaitingKeyframe => stats.samples_awaiting_keyframe += 1,
                }
            }
            Ok(Dispatch::CodecConfig | Dispatch::Empty | Dispatch::Ignored) => {}
            Err(e) => self.fail(e),
        }
    }

    fn on_start_recording(&mut self, sink: Box<dyn SampleSink>) -> Result<usize> {
        if self.adapter.is_halted() {
            discard_unused(sink);
            return Err(RetroError::NotRunning);
        }

        match self.machine.start_recording(sink) {
            Ok(flushed) => {
                {
                    let mut stats = self.shared.stats.lock();
                    stats.samples_flushed += flushed as u64;
                    stats.recordings += 1;
                }
                self.notify(SessionEvent::RecordingStarted { flushed });
                Ok(flushed)
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("Retroactive flush failed: {}", e);
                    self.fail(e.clone());
                }
                Err(e)
            }
        }
    }

    fn on_stop_recording(&mut self) -> Option<Recording> {
        let recording = self.machine.stop_recording()?;
        self.notify(SessionEvent::RecordingStopped {
            samples_written: recording.samples_written(),
        });
        Some(recording)
    }

    fn publish(&self) {
        *self.shared.capture_state.lock() = self.machine.state();
        let buffer = self.machine.buffer();
        let mut stats = self.shared.stats.lock();
        stats.retained = buffer.len();
        stats.samples_evicted = buffer.evicted();
        stats.skipped_frames = self.machine.skipped_frames();
    }
}

/// Capture worker thread function
fn capture_worker(
    mut encoder: Box<dyn HardwareEncoder>,
    machine: CaptureMachine,
    rx: Receiver<WorkerMessage>,
    shared: Shared,
    event_tx: Option<Sender<SessionEvent>>,
) -> Option<Recording> {
    info!("Capture worker started");

    let mut worker = Worker {
        machine,
        adapter: EncoderEventAdapter::new(),
        shared,
        event_tx,
        fatal_sent: false,
    };

    // Shared state is published before any reply so callers see their own change
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Encoder(event) => {
                worker.on_encoder_event(event, encoder.as_mut());
                worker.publish();
            }
            WorkerMessage::StartRecording(sink, reply) => {
                let result = worker.on_start_recording(sink);
                let started = result.is_ok();
                worker.publish();
                if reply.send(result).is_err() && started {
                    // Caller gave up waiting and will never own this recording
                    warn!("Start reply not received, rolling back recording");
                    if let Some(recording) = worker.on_stop_recording() {
                        discard_unused(recording.into_sink());
                    }
                    worker.publish();
                }
            }
            WorkerMessage::StopRecording(reply) => {
                let recording = worker.on_stop_recording();
                worker.publish();
                if let Err(unsent) = reply.send(recording) {
                    // Caller gave up waiting; keep the sink's data rather than lose it
                    if let Some(recording) = unsent.into_inner() {
                        warn!("Stop reply not received, finishing recording here");
                        if let Err(e) = recording.finish() {
                            error!("Failed to finish recording: {}", e);
                        }
                    }
                }
            }
            WorkerMessage::ClearBuffer => {
                worker.machine.clear();
                worker.publish();
                debug!("Retro buffer cleared");
            }
            WorkerMessage::Shutdown => break,
        }
    }

    // Hand back output buffers that were announced but never processed
    for message in rx.try_iter() {
        if let WorkerMessage::Encoder(EncoderEvent::BufferAvailable { index, .. }) = message {
            encoder.release_buffer(index);
        }
    }
    drop(rx);

    encoder.stop();
    info!("Encoder '{}' stopped", encoder.name());

    let pending = worker.machine.stop_recording();
    info!("Capture worker stopped");
    pending
}
