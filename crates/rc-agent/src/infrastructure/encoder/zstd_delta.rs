//! Software codec: zstd-compressed RGBA frames with XOR deltas.
//!
//! - **Keyframe**: `zstd(frame)`.
//! - **Delta frame**: `zstd(frame XOR previous_frame)`.  Unchanged pixels
//!   become runs of zero bytes, which zstd compresses to almost nothing,
//!   so a mostly static screen costs very little bandwidth.
//!
//! The viewer decodes a delta by decompressing and XOR-ing onto the last
//! reconstructed frame, which is why a lost keyframe breaks every delta
//! until the next one.

use std::collections::VecDeque;

use rc_core::{CodecType, EncodedFrame};
use tracing::debug;

use super::{CodecBackend, EncoderConfig, RawFrame};
use crate::application::stream_video::EncoderError;

const BYTES_PER_PIXEL: usize = 4;

/// Picks a zstd level from the target bitrate.
///
/// A tight bitrate budget buys smaller frames with more CPU; a generous one
/// favours speed.
pub fn compression_level_for(bitrate: u32) -> i32 {
    match bitrate {
        0..=1_000_000 => 9,
        1_000_001..=4_000_000 => 5,
        4_000_001..=10_000_000 => 3,
        _ => 1,
    }
}

/// [`CodecBackend`] producing [`CodecType::ZstdDelta`] frames.
#[derive(Default)]
pub struct ZstdDeltaBackend {
    width: u32,
    height: u32,
    level: i32,
    configured: bool,
    previous: Option<Vec<u8>>,
    pending: VecDeque<EncodedFrame>,
}

impl ZstdDeltaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl CodecBackend for ZstdDeltaBackend {
    fn codec(&self) -> CodecType {
        CodecType::ZstdDelta
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError> {
        self.width = config.width;
        self.height = config.height;
        self.level = compression_level_for(config.bitrate);
        self.previous = None;
        self.pending.clear();
        self.configured = true;
        debug!(level = self.level, "zstd backend configured");
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame, force_key_frame: bool) -> Result<(), EncoderError> {
        if !self.configured {
            return Err(EncoderError::NotStarted);
        }
        let expected = self.frame_len();
        if frame.data.len() != expected || frame.width != self.width || frame.height != self.height
        {
            return Err(EncoderError::FrameSize {
                expected,
                actual: frame.data.len(),
            });
        }

        let (is_key_frame, input) = match (&self.previous, force_key_frame) {
            (Some(prev), false) => {
                let delta: Vec<u8> = frame.data.iter().zip(prev).map(|(a, b)| a ^ b).collect();
                (false, delta)
            }
            _ => (true, frame.data.clone()),
        };

        let payload = zstd::encode_all(input.as_slice(), self.level)
            .map_err(|e| EncoderError::Codec(format!("zstd encode failed: {e}")))?;

        self.pending.push_back(EncodedFrame::with_timestamp(
            payload,
            is_key_frame,
            CodecType::ZstdDelta,
            frame.captured_at_ms,
        ));
        self.previous = Some(frame.data.clone());
        Ok(())
    }

    fn poll_output(&mut self) -> Option<EncodedFrame> {
        self.pending.pop_front()
    }

    fn release(&mut self) {
        self.configured = false;
        self.previous = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(width: u32, height: u32) -> ZstdDeltaBackend {
        let mut backend = ZstdDeltaBackend::new();
        backend
            .configure(&EncoderConfig {
                width,
                height,
                frame_rate: 30,
                bitrate: 2_000_000,
                keyframe_interval_secs: 2,
            })
            .unwrap();
        backend
    }

    fn raw(fill: u8, ts: u64) -> RawFrame {
        RawFrame {
            width: 4,
            height: 4,
            data: vec![fill; 64],
            captured_at_ms: ts,
        }
    }

    /// Reconstructs a frame the way a viewer would.
    fn decode(frame: &EncodedFrame, previous: Option<&[u8]>) -> Vec<u8> {
        let plain = zstd::decode_all(frame.payload.as_slice()).unwrap();
        match (frame.is_key_frame, previous) {
            (true, _) | (false, None) => plain,
            (false, Some(prev)) => plain.iter().zip(prev).map(|(a, b)| a ^ b).collect(),
        }
    }

    #[test]
    fn test_first_frame_is_key_then_deltas() {
        // Arrange
        let mut backend = configured(4, 4);

        // Act
        backend.encode(&raw(1, 10), false).unwrap();
        backend.encode(&raw(2, 20), false).unwrap();
        let first = backend.poll_output().unwrap();
        let second = backend.poll_output().unwrap();

        // Assert
        assert!(first.is_key_frame);
        assert!(!second.is_key_frame);
        assert_eq!(second.timestamp_ms, 20);
        assert!(backend.poll_output().is_none());
    }

    #[test]
    fn test_delta_reconstructs_original_pixels() {
        let mut backend = configured(4, 4);
        let mut second = raw(7, 2);
        second.data[5] = 200;

        backend.encode(&raw(7, 1), false).unwrap();
        backend.encode(&second, false).unwrap();
        let key = backend.poll_output().unwrap();
        let delta = backend.poll_output().unwrap();

        let base = decode(&key, None);
        assert_eq!(decode(&delta, Some(&base)), second.data);
    }

    #[test]
    fn test_forced_key_frame_is_self_contained() {
        let mut backend = configured(4, 4);
        backend.encode(&raw(1, 1), false).unwrap();
        backend.encode(&raw(3, 2), true).unwrap();
        backend.poll_output();

        let forced = backend.poll_output().unwrap();

        assert!(forced.is_key_frame);
        assert_eq!(decode(&forced, None), vec![3; 64]);
    }

    #[test]
    fn test_wrong_frame_size_is_a_codec_fault() {
        let mut backend = configured(4, 4);
        let mut bad = raw(1, 1);
        bad.data.truncate(10);

        assert_eq!(
            backend.encode(&bad, false),
            Err(EncoderError::FrameSize {
                expected: 64,
                actual: 10
            })
        );
    }

    #[test]
    fn test_encode_before_configure_fails() {
        let mut backend = ZstdDeltaBackend::new();
        assert_eq!(backend.encode(&raw(1, 1), false), Err(EncoderError::NotStarted));
    }

    #[test]
    fn test_level_tightens_with_lower_bitrate() {
        assert!(compression_level_for(500_000) > compression_level_for(20_000_000));
    }
}
