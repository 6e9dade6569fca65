//! Wire protocol: binary video frames plus tagged JSON control messages.

pub mod messages;
pub mod sequence;
pub mod video;

pub use messages::{from_json, to_json, DeviceMessage, MessageError, ServerMessage};
pub use sequence::SequenceCounter;
pub use video::{decode_video_frame, encode_video_frame, VideoCodecError, VIDEO_HEADER_SIZE};
