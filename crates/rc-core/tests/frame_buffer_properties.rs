//! Property and concurrency tests for the frame buffer.
//!
//! These exercise the public API only: random push/pop sequences for the
//! size bound and ordering guarantees, and real threads for the
//! producer/consumer case.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use rc_core::{CodecType, DiagnosticsManager, EncodedFrame, FrameBuffer};

#[derive(Debug, Clone)]
enum Op {
    Push { key: bool },
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<bool>().prop_map(|key| Op::Push { key }),
        1 => Just(Op::Pop),
    ]
}

fn tagged(seq: u64, key: bool) -> EncodedFrame {
    EncodedFrame::with_timestamp(seq.to_be_bytes().to_vec(), key, CodecType::H264, seq)
}

proptest! {
    #[test]
    fn size_never_exceeds_capacity_plus_one(
        capacity in 1usize..12,
        ops in proptest::collection::vec(op(), 0..300),
    ) {
        let buffer = FrameBuffer::new(capacity);
        let mut seq = 0u64;
        for op in ops {
            match op {
                Op::Push { key } => {
                    buffer.push(tagged(seq, key));
                    seq += 1;
                }
                Op::Pop => {
                    buffer.get_frame();
                }
            }
            prop_assert!(buffer.size() <= capacity + 1);
        }
    }

    #[test]
    fn frames_leave_in_arrival_order(
        capacity in 1usize..12,
        ops in proptest::collection::vec(op(), 0..300),
    ) {
        let buffer = FrameBuffer::new(capacity);
        let mut seq = 0u64;
        let mut last_popped: Option<u64> = None;
        for op in ops {
            match op {
                Op::Push { key } => {
                    buffer.push(tagged(seq, key));
                    seq += 1;
                }
                Op::Pop => {
                    if let Some(frame) = buffer.get_frame() {
                        if let Some(prev) = last_popped {
                            prop_assert!(frame.timestamp_ms > prev);
                        }
                        last_popped = Some(frame.timestamp_ms);
                    }
                }
            }
        }
    }

    #[test]
    fn keyframes_are_always_admitted(
        capacity in 1usize..8,
        keys in proptest::collection::vec(any::<bool>(), 0..100),
    ) {
        let buffer = FrameBuffer::new(capacity);
        for (seq, key) in keys.into_iter().enumerate() {
            let admitted = buffer.push(tagged(seq as u64, key));
            if key {
                prop_assert!(admitted);
            }
        }
    }
}

#[test]
fn test_all_keyframe_buffer_rejects_delta_and_counts_drop_in_diagnostics() {
    // Arrange
    let diag = Arc::new(DiagnosticsManager::new());
    let buffer = FrameBuffer::with_observer(3, diag.clone());
    for seq in 0..3 {
        buffer.push(tagged(seq, true));
    }
    diag.record_frame_encoded(10, false);

    // Act
    let admitted = buffer.push(tagged(3, false));

    // Assert
    assert!(!admitted);
    assert_eq!(buffer.size(), 3);
    let report = diag.get_diagnostics_report();
    assert_eq!(report.video.frames_dropped, 1);
    assert_eq!(report.video.drop_rate_percent, 50.0);
}

#[test]
fn test_concurrent_producer_and_consumer_preserve_invariants() {
    // Arrange
    const FRAMES: u64 = 20_000;
    const CAPACITY: usize = 8;
    let buffer = Arc::new(FrameBuffer::new(CAPACITY));
    let done = Arc::new(AtomicBool::new(false));
    let consumed = Arc::new(AtomicU64::new(0));

    // Act
    let producer = {
        let buffer = Arc::clone(&buffer);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut admitted = 0u64;
            for seq in 0..FRAMES {
                if buffer.push(tagged(seq, seq % 30 == 0)) {
                    admitted += 1;
                }
                assert!(buffer.size() <= CAPACITY + 1);
            }
            done.store(true, Ordering::Release);
            admitted
        })
    };

    let consumer = {
        let buffer = Arc::clone(&buffer);
        let done = Arc::clone(&done);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut last: Option<u64> = None;
            loop {
                match buffer.get_frame() {
                    Some(frame) => {
                        if let Some(prev) = last {
                            assert!(frame.timestamp_ms > prev, "frames out of order");
                        }
                        last = Some(frame.timestamp_ms);
                        consumed.fetch_add(1, Ordering::Relaxed);
                    }
                    None if done.load(Ordering::Acquire) && buffer.is_empty() => break,
                    None => thread::yield_now(),
                }
            }
        })
    };

    let admitted = producer.join().expect("producer panicked");
    consumer.join().expect("consumer panicked");

    // Assert: every admitted frame was either consumed or evicted later.
    let consumed = consumed.load(Ordering::Relaxed);
    assert!(buffer.is_empty());
    assert_eq!(consumed + buffer.dropped_frames(), FRAMES);
    assert!(consumed <= admitted);
}
