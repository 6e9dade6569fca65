//! JSON control messages exchanged with the relay server.
//!
//! Video frames travel as binary WebSocket messages (see
//! [`video`](super::video)).  Everything else is a JSON text message whose
//! `"type"` field selects the variant:
//!
//! ```json
//! {"type":"heartbeat","seq":4,"timestamp_ms":1718000000000}
//! {"type":"start_session","session_id":"abc"}
//! {"type":"input","gesture":{"kind":"tap","x":10.0,"y":20.0}}
//! ```
//!
//! Two enums, one per direction, so the agent cannot accidentally send a
//! server-only message.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::diagnostics::DiagnosticsReport;
use crate::domain::gesture::RemoteGesture;

/// Errors from encoding or parsing a JSON control message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Device → Server ───────────────────────────────────────────────────────────

/// Every message the agent can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Liveness signal, sent on a fixed interval while connected.
    Heartbeat { seq: u64, timestamp_ms: u64 },

    /// Free-form application event (screen locked, app launched, ...).
    DeviceEvent {
        name: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },

    /// Periodic streaming health report.
    Diagnostics { report: DiagnosticsReport },

    /// Confirms a server-assigned session id.
    SessionAck { session_id: String },
}

// ── Server → Device ───────────────────────────────────────────────────────────

/// Every message the agent understands from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A viewer joined; replaces the agent's session id.
    StartSession { session_id: String },

    /// A pointer gesture from the viewer, in viewer coordinates.
    Input { gesture: RemoteGesture },

    /// The viewer's video area changed size.
    ViewerResize { width: u32, height: u32 },

    /// The viewer lost decoder state and needs a keyframe.
    RequestKeyframe,

    HeartbeatAck { seq: u64 },
}

/// Serializes `msg` to a JSON string.
pub fn to_json<T: Serialize>(msg: &T) -> Result<String, MessageError> {
    Ok(serde_json::to_string(msg)?)
}

/// Parses a JSON string into `T`.
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, MessageError> {
    Ok(serde_json::from_str(text)?)
}
