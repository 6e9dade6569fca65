//! The encoded video frame record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock;

/// Video codec that produced a frame's payload.
///
/// The discriminant is the tag byte carried in the binary video header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CodecType {
    H264 = 0x01,
    Vp8 = 0x02,
    Mjpeg = 0x03,
    /// RGBA frames, zstd-compressed; delta frames are XOR-ed against the
    /// previous frame before compression.
    ZstdDelta = 0x10,
}

impl CodecType {
    /// Lower-case codec name used in logs and encoder info.
    pub fn as_str(self) -> &'static str {
        match self {
            CodecType::H264 => "h264",
            CodecType::Vp8 => "vp8",
            CodecType::Mjpeg => "mjpeg",
            CodecType::ZstdDelta => "zstd_delta",
        }
    }
}

impl TryFrom<u8> for CodecType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CodecType::H264),
            0x02 => Ok(CodecType::Vp8),
            0x03 => Ok(CodecType::Mjpeg),
            0x10 => Ok(CodecType::ZstdDelta),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of encoder output.
///
/// Ownership moves encoder → [`FrameBuffer`](crate::FrameBuffer) → network
/// sender; the payload is never copied along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Compressed bitstream for this frame.
    pub payload: Vec<u8>,
    /// `true` when the frame decodes without any earlier frame.
    pub is_key_frame: bool,
    pub codec: CodecType,
    /// Monotonic capture time (see [`clock::monotonic_ms`]).
    pub timestamp_ms: u64,
}

impl EncodedFrame {
    /// Creates a frame stamped with the current monotonic time.
    pub fn new(payload: Vec<u8>, is_key_frame: bool, codec: CodecType) -> Self {
        Self::with_timestamp(payload, is_key_frame, codec, clock::monotonic_ms())
    }

    /// Creates a frame with an explicit capture timestamp.
    pub fn with_timestamp(
        payload: Vec<u8>,
        is_key_frame: bool,
        codec: CodecType,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            payload,
            is_key_frame,
            codec,
            timestamp_ms,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_tag_byte_round_trips_for_every_codec() {
        for codec in [
            CodecType::H264,
            CodecType::Vp8,
            CodecType::Mjpeg,
            CodecType::ZstdDelta,
        ] {
            assert_eq!(CodecType::try_from(codec as u8), Ok(codec));
        }
    }

    #[test]
    fn test_codec_type_rejects_unknown_tag() {
        assert!(CodecType::try_from(0x7F).is_err());
    }

    #[test]
    fn test_codec_type_serializes_as_snake_case() {
        let json = serde_json::to_string(&CodecType::ZstdDelta).unwrap();
        assert_eq!(json, "\"zstd_delta\"");
    }

    #[test]
    fn test_new_frame_reports_payload_length() {
        let frame = EncodedFrame::new(vec![1, 2, 3], true, CodecType::H264);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
        assert!(frame.is_key_frame);
    }
}
