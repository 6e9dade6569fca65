//! rc-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rc-agent do? (for beginners)
//!
//! The agent runs on the device being supported.  Once started it:
//!
//! 1. Pulls raw frames from a capture source and hands them to the
//!    [`VideoEncoder`](infrastructure::encoder::VideoEncoder), which runs on
//!    its own thread.
//! 2. Queues encoded frames in a shared [`FrameBuffer`](rc_core::FrameBuffer)
//!    that sheds stale delta frames when the network falls behind.
//! 3. Streams the frames over a WebSocket to the relay server, together with
//!    heartbeats and periodic diagnostics reports.
//! 4. Receives the viewer's taps and swipes, maps them from viewer pixels to
//!    device pixels, and hands them to a gesture injector.

/// Application layer: streaming and input-routing use cases.
pub mod application;

/// Infrastructure layer: encoder, network, capture, display and config adapters.
pub mod infrastructure;
