//! Real-time streaming health counters.
//!
//! # How counters are shared (for beginners)
//!
//! The encoder thread, the network tasks and the timers all report into the
//! same [`DiagnosticsManager`] through an `Arc`.  Every piece of state lives
//! behind a single `Mutex`, so a [`DiagnosticsReport`] is always a coherent
//! snapshot: a reader can never see `frames_encoded` from before a frame and
//! `total_bytes` from after it.
//!
//! Frame rate and bitrate are computed over a trailing one-second window of
//! `(instant, bytes)` samples.  Time-dependent recorders have `_at` variants
//! that take an explicit [`Instant`] so tests do not need to sleep.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock;
use crate::domain::frame_buffer::FrameDropObserver;

/// Width of the trailing window used for fps and bitrate.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Flat numeric view returned by [`DiagnosticsManager::get_summary_stats`].
pub type SummaryStats = BTreeMap<&'static str, f64>;

// ── Report structures ─────────────────────────────────────────────────────────

/// Coherent point-in-time snapshot of every counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Wall-clock time the snapshot was taken (ms since the Unix epoch).
    pub timestamp_ms: u64,
    pub connection: ConnectionStats,
    pub video: VideoStats,
    pub jitter: JitterStats,
    pub errors: ErrorStats,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub uptime_seconds: f64,
    pub heartbeats_sent: u64,
    pub reconnect_attempts: u64,
    pub successful_reconnects: u64,
    pub connections: u64,
    pub disconnections: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoStats {
    pub fps: f64,
    /// Bits per second over the trailing window.
    pub bitrate_bps: f64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub keyframes: u64,
    pub total_bytes: u64,
    pub drop_rate_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JitterStats {
    pub samples: u64,
    pub average_ms: f64,
    pub buffer_underruns: u64,
    pub buffer_overflows: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    pub encoding: u64,
    pub network: u64,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct DiagnosticsState {
    connection_started_at: Option<Instant>,
    connections: u64,
    disconnections: u64,
    heartbeats: u64,
    reconnect_attempts: u64,
    successful_reconnects: u64,

    frames_encoded: u64,
    frames_dropped: u64,
    keyframes: u64,
    total_bytes: u64,
    /// Encoded frames inside the trailing window, oldest first.
    window: VecDeque<(Instant, usize)>,

    jitter_samples: u64,
    jitter_mean_ms: f64,
    buffer_underruns: u64,
    buffer_overflows: u64,

    encoding_errors: u64,
    network_errors: u64,
}

impl DiagnosticsState {
    fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.window.front() {
            if now.saturating_duration_since(at) >= RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn fps(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.window.len() as f64 / RATE_WINDOW.as_secs_f64()
    }

    fn bitrate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let bytes: usize = self.window.iter().map(|&(_, b)| b).sum();
        bytes as f64 * 8.0 / RATE_WINDOW.as_secs_f64()
    }

    fn uptime(&self, now: Instant) -> Duration {
        self.connection_started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn drop_rate(&self) -> f64 {
        let total = self.frames_encoded + self.frames_dropped;
        if total == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / total as f64 * 100.0
        }
    }
}

// ── DiagnosticsManager ────────────────────────────────────────────────────────

/// Thread-safe aggregator for connection, video, jitter and error counters.
#[derive(Default)]
pub struct DiagnosticsManager {
    state: Mutex<DiagnosticsState>,
}

impl DiagnosticsManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Connection ───────────────────────────────────────────────────────────

    /// Marks the start of a connected period; uptime counts from here.
    pub fn record_connection_start(&self) {
        self.record_connection_start_at(Instant::now());
    }

    pub fn record_connection_start_at(&self, now: Instant) {
        let mut state = self.lock();
        state.connection_started_at = Some(now);
        state.connections += 1;
    }

    /// Ends the connected period; uptime reads zero until the next start.
    pub fn record_disconnection(&self) {
        let mut state = self.lock();
        state.connection_started_at = None;
        state.disconnections += 1;
    }

    pub fn record_heartbeat(&self) {
        self.lock().heartbeats += 1;
    }

    pub fn record_reconnect_attempt(&self) {
        self.lock().reconnect_attempts += 1;
    }

    pub fn record_successful_reconnect(&self) {
        self.lock().successful_reconnects += 1;
    }

    // ── Video ────────────────────────────────────────────────────────────────

    pub fn record_frame_encoded(&self, bytes: usize, is_key_frame: bool) {
        self.record_frame_encoded_at(bytes, is_key_frame, Instant::now());
    }

    pub fn record_frame_encoded_at(&self, bytes: usize, is_key_frame: bool, now: Instant) {
        let mut state = self.lock();
        state.frames_encoded += 1;
        state.total_bytes += bytes as u64;
        if is_key_frame {
            state.keyframes += 1;
        }
        state.window.push_back((now, bytes));
        state.prune(now);
    }

    pub fn record_frame_dropped(&self) {
        self.lock().frames_dropped += 1;
    }

    // ── Jitter ───────────────────────────────────────────────────────────────

    /// Adds one inter-frame jitter sample to the running mean.
    pub fn record_jitter(&self, jitter_ms: f64) {
        let mut state = self.lock();
        state.jitter_samples += 1;
        let n = state.jitter_samples as f64;
        state.jitter_mean_ms += (jitter_ms - state.jitter_mean_ms) / n;
    }

    pub fn record_jitter_buffer_underrun(&self) {
        self.lock().buffer_underruns += 1;
    }

    pub fn record_jitter_buffer_overflow(&self) {
        self.lock().buffer_overflows += 1;
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    pub fn record_encoding_error(&self) {
        self.lock().encoding_errors += 1;
    }

    pub fn record_network_error(&self) {
        self.lock().network_errors += 1;
    }

    // ── Readers ──────────────────────────────────────────────────────────────

    /// Frames per second over the trailing window.
    pub fn get_current_fps(&self) -> f64 {
        self.get_current_fps_at(Instant::now())
    }

    pub fn get_current_fps_at(&self, now: Instant) -> f64 {
        self.lock().fps(now)
    }

    /// Bits per second over the trailing window.
    pub fn get_current_bitrate(&self) -> f64 {
        self.get_current_bitrate_at(Instant::now())
    }

    pub fn get_current_bitrate_at(&self, now: Instant) -> f64 {
        self.lock().bitrate(now)
    }

    pub fn get_connection_uptime(&self) -> Duration {
        self.get_connection_uptime_at(Instant::now())
    }

    pub fn get_connection_uptime_at(&self, now: Instant) -> Duration {
        self.lock().uptime(now)
    }

    pub fn get_summary_stats(&self) -> SummaryStats {
        self.get_summary_stats_at(Instant::now())
    }

    pub fn get_summary_stats_at(&self, now: Instant) -> SummaryStats {
        let mut state = self.lock();
        let fps = state.fps(now);
        let bitrate = state.bitrate(now);

        BTreeMap::from([
            ("fps", fps),
            ("bitrate_mbps", bitrate / 1_000_000.0),
            ("frames_encoded", state.frames_encoded as f64),
            ("frames_dropped", state.frames_dropped as f64),
            ("keyframes", state.keyframes as f64),
            ("drop_rate", state.drop_rate()),
            ("uptime_seconds", state.uptime(now).as_secs_f64()),
            ("reconnects", state.successful_reconnects as f64),
            ("reconnect_attempts", state.reconnect_attempts as f64),
            ("heartbeats", state.heartbeats as f64),
            ("jitter_avg_ms", state.jitter_mean_ms),
            ("encoding_errors", state.encoding_errors as f64),
            ("network_errors", state.network_errors as f64),
        ])
    }

    pub fn get_diagnostics_report(&self) -> DiagnosticsReport {
        self.get_diagnostics_report_at(Instant::now())
    }

    pub fn get_diagnostics_report_at(&self, now: Instant) -> DiagnosticsReport {
        let mut state = self.lock();
        let fps = state.fps(now);
        let bitrate_bps = state.bitrate(now);

        DiagnosticsReport {
            timestamp_ms: clock::unix_ms(),
            connection: ConnectionStats {
                connected: state.connection_started_at.is_some(),
                uptime_seconds: state.uptime(now).as_secs_f64(),
                heartbeats_sent: state.heartbeats,
                reconnect_attempts: state.reconnect_attempts,
                successful_reconnects: state.successful_reconnects,
                connections: state.connections,
                disconnections: state.disconnections,
            },
            video: VideoStats {
                fps,
                bitrate_bps,
                frames_encoded: state.frames_encoded,
                frames_dropped: state.frames_dropped,
                keyframes: state.keyframes,
                total_bytes: state.total_bytes,
                drop_rate_percent: state.drop_rate(),
            },
            jitter: JitterStats {
                samples: state.jitter_samples,
                average_ms: state.jitter_mean_ms,
                buffer_underruns: state.buffer_underruns,
                buffer_overflows: state.buffer_overflows,
            },
            errors: ErrorStats {
                encoding: state.encoding_errors,
                network: state.network_errors,
            },
        }
    }

    /// Emits one structured `info!` event with the headline numbers.
    pub fn log_stats(&self) {
        let report = self.get_diagnostics_report();
        info!(
            fps = report.video.fps,
            bitrate_mbps = report.video.bitrate_bps / 1_000_000.0,
            frames_encoded = report.video.frames_encoded,
            frames_dropped = report.video.frames_dropped,
            drop_rate = report.video.drop_rate_percent,
            uptime_s = report.connection.uptime_seconds,
            reconnects = report.connection.successful_reconnects,
            jitter_ms = report.jitter.average_ms,
            encoding_errors = report.errors.encoding,
            network_errors = report.errors.network,
            "streaming diagnostics"
        );
    }

    /// Zeroes every counter and gauge in one step.
    pub fn reset(&self) {
        *self.lock() = DiagnosticsState::default();
    }
}

/// A frame shed by the buffer is both a dropped frame and a buffer overflow.
impl FrameDropObserver for DiagnosticsManager {
    fn on_frame_dropped(&self) {
        let mut state = self.lock();
        state.frames_dropped += 1;
        state.buffer_overflows += 1;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
