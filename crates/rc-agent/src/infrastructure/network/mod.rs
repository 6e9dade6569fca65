//! Network infrastructure: the streaming connection to the relay server.
//!
//! - **`connection_manager`** – [`ConnectionManager`] owns the WebSocket,
//!   reconnects with backoff, runs the heartbeat and diagnostics timers, and
//!   turns server messages into [`ConnectionEvent`]s.
//! - **`backoff`** – Exponential reconnect delays with equal jitter.
//! - **`pinning`** – rustls client config with SPKI certificate pinning.

pub mod backoff;
pub mod connection_manager;
pub mod pinning;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection_manager::{
    normalize_server_url, ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager,
    ConnectionState,
};
pub use pinning::{CertificatePins, TlsSetupError};
