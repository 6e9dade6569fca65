//! Video encoder: raw frames in, tagged encoded frames out.
//!
//! # Threading model (for beginners)
//!
//! Hardware and software codecs are synchronous, CPU-heavy APIs.  Running
//! them on a tokio worker would stall every other task on that worker, so
//! the encoder owns a dedicated OS thread:
//!
//! ```text
//! capture source ──submit()──► InputSurface ──bounded queue──► encoder thread
//!                                                                 │
//!                               EncoderEvent (unbounded channel) ◄┘
//! ```
//!
//! - [`InputSurface::submit`] never blocks: if the queue is full the raw frame
//!   is dropped, because a newer one is already on its way.
//! - The encoder thread publishes on an unbounded channel and therefore
//!   never waits on the network either.
//!
//! The actual compression is behind the [`CodecBackend`] trait.  A software
//! backend ([`ZstdDeltaBackend`]) ships with the agent; platform hardware
//! encoders implement the same trait.

pub mod zstd_delta;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rc_core::{CodecType, EncodedFrame};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::application::stream_video::{EncoderError, EncoderEvent};

pub use zstd_delta::ZstdDeltaBackend;

/// Raw frames that may wait between the capture source and the encoder thread.
const INPUT_QUEUE_DEPTH: usize = 4;

/// How often an idle encoder thread re-checks its running flag.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Configuration ─────────────────────────────────────────────────────────────

/// Encoder parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Target frames per second.
    pub frame_rate: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Seconds between forced keyframes.
    pub keyframe_interval_secs: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bitrate: 2_000_000,
            keyframe_interval_secs: 2,
        }
    }
}

impl EncoderConfig {
    /// Checks that every parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns [`EncoderError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), EncoderError> {
        let check = |ok: bool, what: &str| {
            if ok {
                Ok(())
            } else {
                Err(EncoderError::InvalidConfig(format!("{what} must be greater than zero")))
            }
        };
        check(self.width > 0, "width")?;
        check(self.height > 0, "height")?;
        check(self.frame_rate > 0, "frame_rate")?;
        check(self.bitrate > 0, "bitrate")
    }

    /// Frames between forced keyframes, never less than one.
    pub fn keyframe_interval_frames(&self) -> u64 {
        (self.keyframe_interval_secs as u64 * self.frame_rate as u64).max(1)
    }
}

/// Snapshot returned by [`VideoEncoder::get_encoder_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub keyframe_interval_secs: u32,
    pub codec: CodecType,
    pub is_encoding: bool,
}

// ── Codec backend seam ────────────────────────────────────────────────────────

/// One uncompressed captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Pixel data, RGBA8 row-major.
    pub data: Vec<u8>,
    /// Monotonic capture time in milliseconds.
    pub captured_at_ms: u64,
}

/// A codec implementation driven by the encoder thread.
///
/// `encode` queues output internally; `poll_output` hands it back one frame
/// at a time.  This mirrors how platform codecs expose separate input and
/// output queues.
pub trait CodecBackend: Send {
    fn codec(&self) -> CodecType;

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError>;

    /// Encodes `frame`; `force_key_frame` requests a self-contained frame.
    fn encode(&mut self, frame: &RawFrame, force_key_frame: bool) -> Result<(), EncoderError>;

    fn poll_output(&mut self) -> Option<EncodedFrame>;

    /// Frees codec resources.  Must be safe to call more than once.
    fn release(&mut self);
}

// ── InputSurface ──────────────────────────────────────────────────────────────

/// Handle the capture source writes raw frames into.
///
/// Cloneable; every clone feeds the same encoder.
#[derive(Clone)]
pub struct InputSurface {
    tx: SyncSender<RawFrame>,
    width: u32,
    height: u32,
    dropped: Arc<AtomicU64>,
}

impl InputSurface {
    /// Queues `frame` for encoding without blocking.
    ///
    /// Returns `false` if the queue is full (the frame is dropped) or the
    /// encoder has stopped.
    pub fn submit(&self, frame: RawFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("encoder input queue full; raw frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Dimensions the encoder expects.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw frames dropped because the encoder was busy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── VideoEncoder ──────────────────────────────────────────────────────────────

type SharedBackend = Arc<Mutex<Box<dyn CodecBackend>>>;

fn lock_backend(backend: &SharedBackend) -> MutexGuard<'_, Box<dyn CodecBackend>> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the codec backend and the encoder thread.
///
/// All methods take `&self` and may be called from any thread.
pub struct VideoEncoder {
    config: EncoderConfig,
    codec: CodecType,
    backend: SharedBackend,
    events: mpsc::UnboundedSender<EncoderEvent>,
    running: Arc<AtomicBool>,
    keyframe_requested: Arc<AtomicBool>,
    surface: Mutex<Option<InputSurface>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VideoEncoder {
    /// Creates a stopped encoder and the receiver for its events.
    pub fn new(
        config: EncoderConfig,
        backend: Box<dyn CodecBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<EncoderEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let encoder = Self {
            codec: backend.codec(),
            config,
            backend: Arc::new(Mutex::new(backend)),
            events,
            running: Arc::new(AtomicBool::new(false)),
            keyframe_requested: Arc::new(AtomicBool::new(false)),
            surface: Mutex::new(None),
            worker: Mutex::new(None),
        };
        (encoder, rx)
    }

    /// Configures the backend and starts the encoder thread.
    ///
    /// Returns `true` if the encoder is running afterwards.  On failure an
    /// [`EncoderEvent::Error`] is published and the encoder stays stopped.
    pub fn start(&self) -> bool {
        if self.is_encoding() {
            return true;
        }
        // A thread that stopped itself after a fault still needs joining.
        self.stop();

        if let Err(e) = self
            .config
            .validate()
            .and_then(|()| lock_backend(&self.backend).configure(&self.config))
        {
            error!("encoder start failed: {e}");
            let _ = self.events.send(EncoderEvent::Error(e));
            return false;
        }

        let (tx, rx) = std_mpsc::sync_channel(INPUT_QUEUE_DEPTH);
        let surface = InputSurface {
            tx,
            width: self.config.width,
            height: self.config.height,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        self.running.store(true, Ordering::SeqCst);
        // The first frame after start is always a keyframe.
        self.keyframe_requested.store(true, Ordering::SeqCst);

        let worker = EncoderWorker {
            backend: Arc::clone(&self.backend),
            events: self.events.clone(),
            running: Arc::clone(&self.running),
            keyframe_requested: Arc::clone(&self.keyframe_requested),
            keyframe_interval: self.config.keyframe_interval_frames(),
        };
        let spawned = thread::Builder::new()
            .name("rc-encoder".into())
            .spawn(move || worker.run(rx));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                *lock(&self.surface) = Some(surface);
                info!(
                    codec = %self.codec,
                    width = self.config.width,
                    height = self.config.height,
                    fps = self.config.frame_rate,
                    "encoder started"
                );
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                lock_backend(&self.backend).release();
                let err = EncoderError::Codec(format!("failed to spawn encoder thread: {e}"));
                error!("{err}");
                let _ = self.events.send(EncoderEvent::Error(err));
                false
            }
        }
    }

    /// Stops the encoder thread and releases the backend.
    ///
    /// Idempotent and safe before [`start`](Self::start).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.surface).take();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("encoder thread panicked");
            }
            lock_backend(&self.backend).release();
            info!("encoder stopped");
        }
    }

    pub fn is_encoding(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_encoder_info(&self) -> EncoderInfo {
        EncoderInfo {
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.config.frame_rate,
            bitrate: self.config.bitrate,
            keyframe_interval_secs: self.config.keyframe_interval_secs,
            codec: self.codec,
            is_encoding: self.is_encoding(),
        }
    }

    /// Publishes any output the backend still holds.  No-op when stopped.
    pub fn drain_encoder(&self) {
        if !self.is_encoding() {
            return;
        }
        let mut backend = lock_backend(&self.backend);
        while let Some(frame) = backend.poll_output() {
            let _ = self.events.send(EncoderEvent::Frame(frame));
        }
    }

    /// The surface to feed raw frames into; `None` unless encoding.
    pub fn input_surface(&self) -> Option<InputSurface> {
        if !self.is_encoding() {
            return None;
        }
        lock(&self.surface).clone()
    }

    /// Makes the next encoded frame a keyframe.
    pub fn request_keyframe(&self) {
        debug!("keyframe requested");
        self.keyframe_requested.store(true, Ordering::SeqCst);
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Worker thread ─────────────────────────────────────────────────────────────

struct EncoderWorker {
    backend: SharedBackend,
    events: mpsc::UnboundedSender<EncoderEvent>,
    running: Arc<AtomicBool>,
    keyframe_requested: Arc<AtomicBool>,
    keyframe_interval: u64,
}

impl EncoderWorker {
    fn run(self, input: std_mpsc::Receiver<RawFrame>) {
        let mut frame_index: u64 = 0;

        while self.running.load(Ordering::SeqCst) {
            let raw = match input.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(raw) => raw,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let periodic = frame_index % self.keyframe_interval == 0;
            let requested = self.keyframe_requested.swap(false, Ordering::SeqCst);
            frame_index += 1;

            let mut backend = lock_backend(&self.backend);
            if let Err(e) = backend.encode(&raw, periodic || requested) {
                error!("encoder fault, stopping: {e}");
                self.running.store(false, Ordering::SeqCst);
                let _ = self.events.send(EncoderEvent::Error(e));
                break;
            }
            while let Some(frame) = backend.poll_output() {
                if self.events.send(EncoderEvent::Frame(frame)).is_err() {
                    // Nobody is listening any more.
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
        debug!("encoder thread exiting after {frame_index} frames");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
