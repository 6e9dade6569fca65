//! Bounded, keyframe-aware queue between the encoder and the network sender.
//!
//! # Why not a plain bounded channel? (for beginners)
//!
//! In a live remote-control view, a stale frame is worse than no frame: the
//! viewer wants to see the screen *now*.  When the network cannot keep up, the
//! buffer therefore sheds old frames instead of making the encoder wait.
//!
//! Not all frames are equal, though.  A *keyframe* can be decoded on its own;
//! a *delta* frame (P-frame) only describes changes since the previous frame.
//! Throwing away a keyframe leaves the viewer unable to decode anything until
//! the next one, so the eviction policy always sacrifices delta frames first.
//!
//! # Policy (applied when the buffer is at capacity)
//!
//! | Incoming  | Buffer holds a delta frame       | Buffer holds only keyframes        |
//! |-----------|----------------------------------|------------------------------------|
//! | keyframe  | evict oldest delta, admit        | admit anyway (capacity + 1)        |
//! | delta     | evict oldest delta, admit        | reject the incoming frame          |
//!
//! The keyframe overflow is bounded: a buffer already at `capacity + 1` that
//! receives yet another keyframe evicts its oldest keyframe.
//!
//! Every eviction and every rejection counts as one dropped frame and is
//! reported to the [`FrameDropObserver`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::domain::frame::{CodecType, EncodedFrame};

/// Default number of frames held between encoder and sender.
pub const DEFAULT_CAPACITY: usize = 30;

/// Receives a notification for every frame the buffer discards.
///
/// Called after the buffer lock has been released, so implementations may
/// take their own locks freely.
pub trait FrameDropObserver: Send + Sync {
    fn on_frame_dropped(&self);
}

/// Point-in-time view of the buffer returned by [`FrameBuffer::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameBufferStats {
    pub size: usize,
    pub capacity: usize,
    pub is_empty: bool,
    pub is_full: bool,
    pub utilization_percent: f64,
}

/// What the policy decided for one enqueue.
enum Admission {
    Admit,
    /// Admit after removing the frame at this index.
    EvictThenAdmit(usize),
    Reject,
}

/// Bounded FIFO of [`EncodedFrame`]s, safe to share between threads.
///
/// All operations return immediately; none of them wait for space or data.
pub struct FrameBuffer {
    frames: Mutex<VecDeque<EncodedFrame>>,
    capacity: usize,
    dropped: AtomicU64,
    observer: Option<Arc<dyn FrameDropObserver>>,
}

impl FrameBuffer {
    /// Creates an empty buffer.  A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
            dropped: AtomicU64::new(0),
            observer: None,
        }
    }

    /// Creates an empty buffer that reports drops to `observer`.
    pub fn with_observer(capacity: usize, observer: Arc<dyn FrameDropObserver>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::new(capacity)
        }
    }

    /// Stamps a new frame with the current monotonic time and enqueues it.
    ///
    /// Returns `true` if the frame was admitted.
    pub fn add_frame(&self, payload: Vec<u8>, is_key_frame: bool, codec: CodecType) -> bool {
        self.push(EncodedFrame::new(payload, is_key_frame, codec))
    }

    /// Enqueues an already-built frame, applying the backpressure policy.
    ///
    /// Returns `true` if `frame` was admitted.  A rejected frame is dropped.
    pub fn push(&self, frame: EncodedFrame) -> bool {
        let (admitted, drops) = {
            let mut frames = self.lock();
            match self.decide(&frames, frame.is_key_frame) {
                Admission::Admit => {
                    frames.push_back(frame);
                    (true, 0)
                }
                Admission::EvictThenAdmit(index) => {
                    frames.remove(index);
                    frames.push_back(frame);
                    (true, 1)
                }
                Admission::Reject => (false, 1),
            }
        };

        if drops > 0 {
            self.dropped.fetch_add(drops, Ordering::Relaxed);
            trace!(admitted, "frame buffer shed a frame");
            if let Some(observer) = &self.observer {
                observer.on_frame_dropped();
            }
        }
        admitted
    }

    fn decide(&self, frames: &VecDeque<EncodedFrame>, incoming_is_key: bool) -> Admission {
        if frames.len() < self.capacity {
            return Admission::Admit;
        }

        let oldest_delta = frames.iter().position(|f| !f.is_key_frame);
        match (incoming_is_key, oldest_delta) {
            (_, Some(index)) => Admission::EvictThenAdmit(index),
            // Only keyframes left: one slot of overflow, never more.
            (true, None) if frames.len() <= self.capacity => Admission::Admit,
            (true, None) => Admission::EvictThenAdmit(0),
            (false, None) => Admission::Reject,
        }
    }

    /// Removes and returns the oldest frame, or `None` when empty.
    pub fn get_frame(&self) -> Option<EncodedFrame> {
        self.lock().pop_front()
    }

    /// Returns a copy of the oldest frame without removing it.
    pub fn peek_frame(&self) -> Option<EncodedFrame> {
        self.lock().front().cloned()
    }

    /// Discards every queued frame.  Cleared frames are not counted as drops.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `true` once the buffer holds `capacity` frames (or the keyframe overflow).
    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted or rejected since construction.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// `size / capacity * 100`.  May briefly exceed 100 during keyframe overflow.
    pub fn get_utilization(&self) -> f64 {
        Self::utilization(self.size(), self.capacity)
    }

    pub fn get_stats(&self) -> FrameBufferStats {
        let size = self.size();
        FrameBufferStats {
            size,
            capacity: self.capacity,
            is_empty: size == 0,
            is_full: size >= self.capacity,
            utilization_percent: Self::utilization(size, self.capacity),
        }
    }

    fn utilization(size: usize, capacity: usize) -> f64 {
        size as f64 / capacity as f64 * 100.0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EncodedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> EncodedFrame {
        EncodedFrame::with_timestamp(vec![tag], true, CodecType::H264, tag as u64)
    }

    fn delta(tag: u8) -> EncodedFrame {
        EncodedFrame::with_timestamp(vec![tag], false, CodecType::H264, tag as u64)
    }

    fn drain_tags(buffer: &FrameBuffer) -> Vec<u8> {
        std::iter::from_fn(|| buffer.get_frame())
            .map(|f| f.payload[0])
            .collect()
    }

    #[derive(Default)]
    struct CountingObserver(AtomicU64);

    impl FrameDropObserver for CountingObserver {
        fn on_frame_dropped(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = FrameBuffer::new(5);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 5);
        assert!(buffer.get_frame().is_none());
        assert!(buffer.peek_frame().is_none());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.add_frame(vec![1], false, CodecType::Vp8));
    }

    #[test]
    fn test_add_frame_stamps_codec_and_key_flag() {
        let buffer = FrameBuffer::new(3);
        assert!(buffer.add_frame(vec![9, 9], true, CodecType::Mjpeg));

        let frame = buffer.get_frame().expect("frame");
        assert_eq!(frame.payload, vec![9, 9]);
        assert!(frame.is_key_frame);
        assert_eq!(frame.codec, CodecType::Mjpeg);
    }

    #[test]
    fn test_frames_dequeue_in_fifo_order() {
        let buffer = FrameBuffer::new(5);
        for tag in 1..=4 {
            buffer.push(delta(tag));
        }
        assert_eq!(drain_tags(&buffer), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_peek_does_not_remove_head() {
        let buffer = FrameBuffer::new(2);
        buffer.push(key(7));
        assert_eq!(buffer.peek_frame().map(|f| f.payload[0]), Some(7));
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_full_buffer_with_delta_admits_keyframe_by_evicting_oldest_delta() {
        // Arrange: [K1, D2, D3] at capacity 3
        let buffer = FrameBuffer::new(3);
        buffer.push(key(1));
        buffer.push(delta(2));
        buffer.push(delta(3));

        // Act
        let admitted = buffer.push(key(4));

        // Assert: D2 (oldest delta) went away, size unchanged
        assert!(admitted);
        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.dropped_frames(), 1);
        assert_eq!(drain_tags(&buffer), vec![1, 3, 4]);
    }

    #[test]
    fn test_full_buffer_with_delta_admits_delta_by_evicting_oldest_delta() {
        let buffer = FrameBuffer::new(3);
        buffer.push(delta(1));
        buffer.push(key(2));
        buffer.push(delta(3));

        assert!(buffer.push(delta(4)));
        assert_eq!(buffer.dropped_frames(), 1);
        assert_eq!(drain_tags(&buffer), vec![2, 3, 4]);
    }

    #[test]
    fn test_all_keyframe_buffer_rejects_delta_without_changing_size() {
        let buffer = FrameBuffer::new(2);
        buffer.push(key(1));
        buffer.push(key(2));

        let admitted = buffer.push(delta(3));

        assert!(!admitted);
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.dropped_frames(), 1);
        assert_eq!(drain_tags(&buffer), vec![1, 2]);
    }

    #[test]
    fn test_all_keyframe_buffer_overflows_by_one_for_keyframe() {
        let buffer = FrameBuffer::new(2);
        buffer.push(key(1));
        buffer.push(key(2));

        assert!(buffer.push(key(3)));

        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.dropped_frames(), 0);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_keyframe_overflow_never_exceeds_one_extra_slot() {
        let buffer = FrameBuffer::new(2);
        for tag in 1..=6 {
            buffer.push(key(tag));
        }

        // 1 and 2 fill the buffer, 3 overflows, 4..6 each evict the oldest keyframe.
        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.dropped_frames(), 3);
        assert_eq!(drain_tags(&buffer), vec![4, 5, 6]);
    }

    #[test]
    fn test_drops_are_reported_to_observer() {
        let observer = Arc::new(CountingObserver::default());
        let buffer = FrameBuffer::with_observer(1, observer.clone());
        buffer.push(key(1));

        buffer.push(delta(2)); // rejected
        buffer.push(delta(3)); // rejected

        assert_eq!(observer.0.load(Ordering::Relaxed), 2);
        assert_eq!(buffer.dropped_frames(), 2);
    }

    #[test]
    fn test_clear_empties_buffer_without_counting_drops() {
        let buffer = FrameBuffer::new(4);
        buffer.push(key(1));
        buffer.push(delta(2));

        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped_frames(), 0);
    }

    #[test]
    fn test_utilization_is_percentage_of_capacity() {
        let buffer = FrameBuffer::new(4);
        buffer.push(delta(1));
        assert!((buffer.get_utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_stats_reflects_state() {
        let buffer = FrameBuffer::new(2);
        buffer.push(key(1));
        buffer.push(delta(2));

        let stats = buffer.get_stats();

        assert_eq!(
            stats,
            FrameBufferStats {
                size: 2,
                capacity: 2,
                is_empty: false,
                is_full: true,
                utilization_percent: 100.0,
            }
        );
    }
}
