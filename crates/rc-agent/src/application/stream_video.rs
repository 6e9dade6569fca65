//! Video streaming use case: encoder output → frame buffer → frame sink.
//!
//! # Two loops, one buffer (for beginners)
//!
//! ```text
//!  encoder thread ──EncoderEvent──► pump task ──push──► FrameBuffer
//!                                                           │ notify
//!                                                           ▼
//!                                   sender task ──get_frame──┘──► FrameSink
//! ```
//!
//! The *pump* never waits on the network: it pushes every frame into the
//! [`FrameBuffer`], which sheds stale delta frames on its own when full.  The
//! *sender* wakes when the pump signals a new frame (or on a short poll
//! tick), drains the buffer, and hands each frame to the [`FrameSink`].
//! When the sink is not ready (no connection) the sender leaves frames in
//! the buffer and the buffer's eviction policy keeps it bounded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rc_core::{DiagnosticsManager, EncodedFrame, FrameBuffer};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time;
use tracing::{debug, error, info};

/// How often the sender re-checks the buffer when no notification arrives.
const SENDER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Error reported by the encoder on its event channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncoderError {
    #[error("invalid encoder configuration: {0}")]
    InvalidConfig(String),

    #[error("raw frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("encoder is not started")]
    NotStarted,
}

/// Everything the encoder publishes.
#[derive(Debug)]
pub enum EncoderEvent {
    /// One encoded frame, tagged key or delta.
    Frame(EncodedFrame),
    /// The encoder hit a fault; after a mid-stream fault it stops encoding.
    Error(EncoderError),
}

/// Destination for encoded frames, typically the network connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// `false` while there is nowhere to send frames (e.g. disconnected).
    fn is_ready(&self) -> bool;

    /// Ships one frame.  Failures are the sink's to count; nothing is returned.
    async fn send_frame(&self, frame: EncodedFrame);
}

/// Moves encoder events into the buffer until the event channel closes.
///
/// Each frame is recorded in diagnostics, pushed into `buffer` (which may
/// shed an older frame) and `notify` wakes the sender.  Encoder errors are
/// counted and logged.
pub async fn run_encoder_pump(
    mut events: mpsc::UnboundedReceiver<EncoderEvent>,
    buffer: Arc<FrameBuffer>,
    diagnostics: Arc<DiagnosticsManager>,
    notify: Arc<Notify>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Frame(frame) => {
                diagnostics.record_frame_encoded(frame.len(), frame.is_key_frame);
                buffer.push(frame);
                notify.notify_one();
            }
            EncoderEvent::Error(e) => {
                diagnostics.record_encoding_error();
                error!("encoder error: {e}");
            }
        }
    }
    debug!("encoder event channel closed; pump exiting");
}

/// Measures how far frame delivery strays from the nominal frame interval.
///
/// The sender samples once per wake-up, at the first frame of a burst.
/// Jitter for one sample is `|actual gap - expected gap|` in milliseconds.
/// A gap longer than twice the expected interval while the sink was ready
/// counts as one buffer underrun.
#[derive(Debug)]
pub struct JitterTracker {
    expected: Duration,
    last_sent: Option<Instant>,
    underrun_reported: bool,
}

impl JitterTracker {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            expected: Duration::from_secs(1) / frame_rate.max(1),
            last_sent: None,
            underrun_reported: false,
        }
    }

    /// Records the first frame delivered in a wake-up; returns the jitter
    /// sample, if any.
    pub fn on_frame_sent(&mut self, now: Instant) -> Option<f64> {
        let sample = self.last_sent.map(|prev| {
            let gap = now.saturating_duration_since(prev).as_secs_f64() * 1000.0;
            (gap - self.expected.as_secs_f64() * 1000.0).abs()
        });
        self.last_sent = Some(now);
        self.underrun_reported = false;
        sample
    }

    /// Called when the sink is ready but the buffer is empty.  Returns `true`
    /// exactly once per starved gap.
    pub fn on_buffer_empty(&mut self, now: Instant) -> bool {
        let Some(prev) = self.last_sent else {
            return false;
        };
        if self.underrun_reported || now.saturating_duration_since(prev) <= self.expected * 2 {
            return false;
        }
        self.underrun_reported = true;
        true
    }

    /// Forgets the previous frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.underrun_reported = false;
    }
}

/// Drains `buffer` into `sink` until `shutdown` turns `true`.
pub async fn run_frame_sender(
    buffer: Arc<FrameBuffer>,
    sink: Arc<dyn FrameSink>,
    diagnostics: Arc<DiagnosticsManager>,
    notify: Arc<Notify>,
    frame_rate: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut jitter = JitterTracker::new(frame_rate);
    info!("frame sender started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = notify.notified() => {}
            _ = time::sleep(SENDER_POLL_INTERVAL) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if !sink.is_ready() {
            jitter.reset();
            continue;
        }

        let mut sent_any = false;
        while sink.is_ready() {
            let Some(frame) = buffer.get_frame() else {
                break;
            };
            if !sent_any {
                // One sample per wake; back-to-back sends in a burst are not gaps.
                if let Some(sample) = jitter.on_frame_sent(Instant::now()) {
                    diagnostics.record_jitter(sample);
                }
            }
            sink.send_frame(frame).await;
            sent_any = true;
        }
        if !sent_any && jitter.on_buffer_empty(Instant::now()) {
            diagnostics.record_jitter_buffer_underrun();
        }
    }

    info!("frame sender stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use rc_core::CodecType;

    #[derive(Default)]
    struct CollectingSink {
        ready: AtomicBool,
        frames: Mutex<Vec<EncodedFrame>>,
    }

    #[async_trait]
    impl FrameSink for CollectingSink {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn send_frame(&self, frame: EncodedFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    fn frame(tag: u8, key: bool) -> EncodedFrame {
        EncodedFrame::with_timestamp(vec![tag; 4], key, CodecType::ZstdDelta, tag as u64)
    }

    #[tokio::test]
    async fn test_pump_records_and_buffers_frames() {
        // Arrange
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(FrameBuffer::new(8));
        let diag = Arc::new(DiagnosticsManager::new());
        let notify = Arc::new(Notify::new());

        tx.send(EncoderEvent::Frame(frame(1, true))).unwrap();
        tx.send(EncoderEvent::Frame(frame(2, false))).unwrap();
        tx.send(EncoderEvent::Error(EncoderError::Codec("boom".into())))
            .unwrap();
        drop(tx);

        // Act
        run_encoder_pump(rx, Arc::clone(&buffer), Arc::clone(&diag), notify).await;

        // Assert
        assert_eq!(buffer.size(), 2);
        let report = diag.get_diagnostics_report();
        assert_eq!(report.video.frames_encoded, 2);
        assert_eq!(report.video.keyframes, 1);
        assert_eq!(report.video.total_bytes, 8);
        assert_eq!(report.errors.encoding, 1);
    }

    #[tokio::test]
    async fn test_sender_drains_buffer_into_ready_sink_in_order() {
        // Arrange
        let buffer = Arc::new(FrameBuffer::new(8));
        let sink = Arc::new(CollectingSink::default());
        sink.ready.store(true, Ordering::SeqCst);
        let notify = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        for tag in 1..=3 {
            buffer.push(frame(tag, tag == 1));
        }

        // Act
        let task = tokio::spawn(run_frame_sender(
            Arc::clone(&buffer),
            sink.clone(),
            Arc::new(DiagnosticsManager::new()),
            Arc::clone(&notify),
            30,
            stop_rx,
        ));
        notify.notify_one();
        time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // Assert
        let tags: Vec<u8> = sink.frames.lock().unwrap().iter().map(|f| f.payload[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_sender_leaves_frames_buffered_while_sink_not_ready() {
        let buffer = Arc::new(FrameBuffer::new(8));
        let sink = Arc::new(CollectingSink::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        buffer.push(frame(1, true));

        let task = tokio::spawn(run_frame_sender(
            Arc::clone(&buffer),
            sink.clone(),
            Arc::new(DiagnosticsManager::new()),
            Arc::new(Notify::new()),
            30,
            stop_rx,
        ));
        time::sleep(Duration::from_millis(60)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(sink.frames.lock().unwrap().is_empty());
        assert_eq!(buffer.size(), 1);
    }

    /// Accepts one frame, then reports not ready, like a connection that
    /// drops in the middle of a burst.
    #[derive(Default)]
    struct DroppingSink {
        ready: AtomicBool,
        delivered: Mutex<Vec<EncodedFrame>>,
    }

    #[async_trait]
    impl FrameSink for DroppingSink {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn send_frame(&self, frame: EncodedFrame) {
            if self.ready.swap(false, Ordering::SeqCst) {
                self.delivered.lock().unwrap().push(frame);
            }
        }
    }

    #[tokio::test]
    async fn test_sender_stops_draining_when_sink_drops_mid_burst() {
        // Arrange
        let buffer = Arc::new(FrameBuffer::new(8));
        let sink = Arc::new(DroppingSink::default());
        sink.ready.store(true, Ordering::SeqCst);
        let notify = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        for tag in 1..=4 {
            buffer.push(frame(tag, tag == 1));
        }

        // Act
        let task = tokio::spawn(run_frame_sender(
            Arc::clone(&buffer),
            sink.clone(),
            Arc::new(DiagnosticsManager::new()),
            Arc::clone(&notify),
            30,
            stop_rx,
        ));
        notify.notify_one();
        time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // Assert
        let delivered: Vec<u8> = sink.delivered.lock().unwrap().iter().map(|f| f.payload[0]).collect();
        assert_eq!(delivered, vec![1]);
        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.peek_frame().unwrap().payload[0], 2);
    }

    #[tokio::test]
    async fn test_burst_records_one_jitter_sample_per_wake() {
        // Arrange
        let buffer = Arc::new(FrameBuffer::new(16));
        let sink = Arc::new(CollectingSink::default());
        sink.ready.store(true, Ordering::SeqCst);
        let diag = Arc::new(DiagnosticsManager::new());
        let notify = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_frame_sender(
            Arc::clone(&buffer),
            sink.clone(),
            Arc::clone(&diag),
            Arc::clone(&notify),
            30,
            stop_rx,
        ));

        // Act: two bursts of five frames, each drained in a single wake.
        for burst in 0..2u8 {
            for tag in 0..5u8 {
                buffer.push(frame(burst * 5 + tag, tag == 0));
            }
            notify.notify_one();
            time::sleep(Duration::from_millis(100)).await;
        }
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // Assert: the first burst has no previous send; the second gives one sample.
        assert_eq!(sink.frames.lock().unwrap().len(), 10);
        assert_eq!(diag.get_diagnostics_report().jitter.samples, 1);
    }

    #[test]
    fn test_jitter_is_distance_from_nominal_interval() {
        // 20 fps → 50 ms nominal gap
        let mut tracker = JitterTracker::new(20);
        let t0 = Instant::now();

        assert_eq!(tracker.on_frame_sent(t0), None);
        let sample = tracker.on_frame_sent(t0 + Duration::from_millis(70)).unwrap();

        assert!((sample - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_underrun_is_reported_once_per_gap() {
        let mut tracker = JitterTracker::new(20);
        let t0 = Instant::now();
        tracker.on_frame_sent(t0);

        assert!(!tracker.on_buffer_empty(t0 + Duration::from_millis(60)));
        assert!(tracker.on_buffer_empty(t0 + Duration::from_millis(150)));
        assert!(!tracker.on_buffer_empty(t0 + Duration::from_millis(200)));
    }
}
