//! Application layer use cases for the agent.
//!
//! - **`stream_video`** – Moves encoder output into the frame buffer and
//!   drains the buffer into whatever sink ships frames to the viewer.  It
//!   depends on a [`FrameSink`](stream_video::FrameSink) trait, not on the
//!   WebSocket client, so it can be tested with an in-memory sink.
//!
//! - **`route_input`** – Converts a viewer gesture into device pixels with
//!   the [`GestureMapper`](rc_core::GestureMapper) and passes it to a
//!   [`GestureInjector`](route_input::GestureInjector).

pub mod route_input;
pub mod stream_video;
