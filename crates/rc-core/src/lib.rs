//! # rc-core
//!
//! Shared library for the remote-control streaming agent containing the
//! frame buffer, the viewer-to-device gesture mapper, the diagnostics
//! aggregator, and the wire protocol.
//!
//! It has zero dependencies on OS APIs, sockets, or async runtimes; the
//! `rc-agent` crate supplies the encoder thread, the WebSocket connection and
//! the wiring.
//!
//! # Architecture overview (for beginners)
//!
//! The agent runs on the *device* (a signage player, a kiosk, a tablet) and
//! streams its screen to a remote *viewer* in a browser.  The viewer can click
//! and swipe on the picture; those pointer events travel back to the device
//! and are replayed on the real screen.
//!
//! ```text
//! capture ─► encoder ─► FrameBuffer ─► connection ─► viewer
//!                                          │
//! device input ◄── GestureMapper ◄─────────┘ (remote gestures)
//! ```
//!
//! This crate defines:
//!
//! - **`domain`** – Pure logic with no I/O.  [`FrameBuffer`] decides which
//!   encoded frames survive when the network falls behind; [`GestureMapper`]
//!   converts viewer coordinates into device pixels; [`DiagnosticsManager`]
//!   aggregates health counters from every thread.
//!
//! - **`protocol`** – How frames and control messages look on the wire.
//!   Video travels as compact binary messages, everything else as tagged JSON.
//!
//! - **`clock`** – Millisecond time helpers shared by both crates.

pub mod clock;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rc_core::FrameBuffer` instead of `rc_core::domain::frame_buffer::FrameBuffer`.
pub use domain::diagnostics::{DiagnosticsManager, DiagnosticsReport};
pub use domain::frame::{CodecType, EncodedFrame};
pub use domain::frame_buffer::{FrameBuffer, FrameBufferStats, FrameDropObserver};
pub use domain::gesture::{DeviceGesture, RemoteGesture};
pub use domain::gesture_mapper::{
    DevicePoint, DisplayMetrics, DisplayMetricsSource, GestureMapper, Point, Rotation,
};
pub use protocol::messages::{DeviceMessage, ServerMessage};
pub use protocol::video::{decode_video_frame, encode_video_frame, VideoCodecError};
