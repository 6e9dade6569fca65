//! Binary framing for encoded video.
//!
//! Wire format:
//! ```text
//! [magic:1 = 0x52][version:1][codec:1][flags:1][timestamp_ms:8][payload_len:4][payload:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are big-endian.
//! Bit 0 of `flags` marks a keyframe; the other bits are reserved and must be
//! zero when encoding (ignored when decoding).
//!
//! Each frame travels in its own binary WebSocket message, so the payload
//! length doubles as an integrity check: the message must contain exactly
//! `16 + payload_len` bytes.

use thiserror::Error;

use crate::domain::frame::{CodecType, EncodedFrame};

/// First byte of every video message (`'R'`).
pub const VIDEO_MAGIC: u8 = 0x52;

/// Current video framing version.
pub const VIDEO_VERSION: u8 = 1;

/// Fixed size of the video header in bytes.
pub const VIDEO_HEADER_SIZE: usize = 16;

const FLAG_KEY_FRAME: u8 = 0b0000_0001;

/// Errors that can occur while decoding a video message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoCodecError {
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("bad magic byte: 0x{0:02X}")]
    BadMagic(u8),

    #[error("unsupported video framing version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown codec tag: 0x{0:02X}")]
    UnknownCodec(u8),

    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    #[error("payload of {0} bytes does not fit the 32-bit length field")]
    PayloadTooLarge(usize),
}

fn payload_len_field(len: usize) -> Result<u32, VideoCodecError> {
    u32::try_from(len).map_err(|_| VideoCodecError::PayloadTooLarge(len))
}

/// Serializes `frame` into one binary message (header + payload).
///
/// # Errors
///
/// Returns [`VideoCodecError::PayloadTooLarge`] if the payload length does
/// not fit in the header's `u32` field.
pub fn encode_video_frame(frame: &EncodedFrame) -> Result<Vec<u8>, VideoCodecError> {
    let payload_len = payload_len_field(frame.payload.len())?;
    let mut buf = Vec::with_capacity(VIDEO_HEADER_SIZE + frame.payload.len());

    buf.push(VIDEO_MAGIC);
    buf.push(VIDEO_VERSION);
    buf.push(frame.codec as u8);
    buf.push(if frame.is_key_frame { FLAG_KEY_FRAME } else { 0 });
    buf.extend_from_slice(&frame.timestamp_ms.to_be_bytes());
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    Ok(buf)
}

/// Parses one binary message back into an [`EncodedFrame`].
///
/// # Errors
///
/// Returns [`VideoCodecError`] if the header is malformed or the payload
/// length does not match the message size.
pub fn decode_video_frame(bytes: &[u8]) -> Result<EncodedFrame, VideoCodecError> {
    if bytes.len() < VIDEO_HEADER_SIZE {
        return Err(VideoCodecError::InsufficientData {
            needed: VIDEO_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[0] != VIDEO_MAGIC {
        return Err(VideoCodecError::BadMagic(bytes[0]));
    }
    if bytes[1] != VIDEO_VERSION {
        return Err(VideoCodecError::UnsupportedVersion(bytes[1]));
    }
    let codec = CodecType::try_from(bytes[2]).map_err(|()| VideoCodecError::UnknownCodec(bytes[2]))?;
    let is_key_frame = bytes[3] & FLAG_KEY_FRAME != 0;

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&bytes[4..12]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[12..16]);

    let declared = u32::from_be_bytes(len) as usize;
    let available = bytes.len() - VIDEO_HEADER_SIZE;
    if declared != available {
        return Err(VideoCodecError::PayloadLengthMismatch {
            declared,
            available,
        });
    }

    Ok(EncodedFrame::with_timestamp(
        bytes[VIDEO_HEADER_SIZE..].to_vec(),
        is_key_frame,
        codec,
        u64::from_be_bytes(ts),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncodedFrame {
        EncodedFrame::with_timestamp(vec![0xAA, 0xBB, 0xCC], true, CodecType::Vp8, 0x0102_0304)
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        // Act
        let bytes = encode_video_frame(&sample()).unwrap();

        // Assert
        assert_eq!(bytes.len(), VIDEO_HEADER_SIZE + 3);
        assert_eq!(&bytes[..4], &[0x52, 0x01, 0x02, 0x01]);
        assert_eq!(&bytes[4..12], &[0, 0, 0, 0, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 3]);
        assert_eq!(&bytes[16..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_decode_restores_frame() {
        let frame = sample();
        assert_eq!(decode_video_frame(&encode_video_frame(&frame).unwrap()), Ok(frame));
    }

    #[test]
    fn test_delta_frame_clears_key_flag() {
        let frame = EncodedFrame::with_timestamp(vec![1], false, CodecType::H264, 7);
        let bytes = encode_video_frame(&frame).unwrap();
        assert_eq!(bytes[3], 0);
        assert!(!decode_video_frame(&bytes).unwrap().is_key_frame);
    }

    #[test]
    fn test_short_message_is_insufficient_data() {
        assert_eq!(
            decode_video_frame(&[0x52, 1, 1]),
            Err(VideoCodecError::InsufficientData {
                needed: 16,
                available: 3
            })
        );
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut bytes = encode_video_frame(&sample()).unwrap();
        bytes[0] = 0x00;
        assert_eq!(decode_video_frame(&bytes), Err(VideoCodecError::BadMagic(0)));
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let mut bytes = encode_video_frame(&sample()).unwrap();
        bytes[2] = 0xEE;
        assert_eq!(decode_video_frame(&bytes), Err(VideoCodecError::UnknownCodec(0xEE)));
    }

    #[test]
    fn test_payload_length_field_limits() {
        assert_eq!(payload_len_field(3), Ok(3));
        assert_eq!(payload_len_field(u32::MAX as usize), Ok(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_payload_over_four_gib_is_too_large() {
        let len = u32::MAX as usize + 1;
        assert_eq!(payload_len_field(len), Err(VideoCodecError::PayloadTooLarge(len)));
    }

    #[test]
    fn test_truncated_payload_is_length_mismatch() {
        let mut bytes = encode_video_frame(&sample()).unwrap();
        bytes.pop();
        assert_eq!(
            decode_video_frame(&bytes),
            Err(VideoCodecError::PayloadLengthMismatch {
                declared: 3,
                available: 2
            })
        );
    }
}
