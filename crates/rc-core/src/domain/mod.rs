//! Domain layer: pure streaming-agent logic with no I/O.
//!
//! # What belongs in the domain layer?
//!
//! - The encoded frame record and the bounded frame queue
//! - Viewer-to-device coordinate mapping and the gesture vocabulary
//! - Health counters and their report structures
//!
//! # What does NOT belong here?
//!
//! - Threads, `tokio` tasks, sockets
//! - Codec bindings or platform display queries (those are behind traits
//!   implemented in `rc-agent`)

pub mod diagnostics;
pub mod frame;
pub mod frame_buffer;
pub mod gesture;
pub mod gesture_mapper;
