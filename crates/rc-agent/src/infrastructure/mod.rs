//! Infrastructure layer for the agent.
//!
//! Contains the adapters that touch the outside world: the encoder thread,
//! the WebSocket connection, the capture source, display metrics, gesture
//! injection and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and `rc_core`,
//! but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`encoder`** – [`VideoEncoder`](encoder::VideoEncoder) on its own OS
//!   thread plus the software [`ZstdDeltaBackend`](encoder::ZstdDeltaBackend).
//! - **`network`** – [`ConnectionManager`](network::ConnectionManager):
//!   WebSocket client, reconnect backoff, certificate pinning.
//! - **`capture`** – Synthetic test-pattern source for running without a
//!   platform screen grabber.
//! - **`display`** – Configured display metrics for the gesture mapper.
//! - **`input_injection`** – Gesture injectors.
//! - **`config`** – TOML agent configuration.

pub mod capture;
pub mod config;
pub mod display;
pub mod encoder;
pub mod input_injection;
pub mod network;
