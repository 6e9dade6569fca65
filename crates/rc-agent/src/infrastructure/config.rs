//! TOML configuration for the agent.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration apart from the device id, which must be provided
//! here or on the command line.
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! base_url = "https://relay.example.com/agent"
//! device_id = "kiosk-0042"
//! device_token = "..."
//!
//! [server.pins]
//! "relay.example.com" = ["sha256/47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="]
//!
//! [encoder]
//! width = 1280
//! height = 720
//! frame_rate = 30
//!
//! [connection.backoff]
//! initial = 500      # milliseconds
//! max = 30000
//! multiplier = 2.0
//!
//! [display]
//! width = 1080
//! height = 1920
//! rotation = "90"
//! ```
//!
//! Sections and fields that are absent take the value of the matching
//! `default_*` helper below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rc_core::domain::frame_buffer::DEFAULT_CAPACITY;
use rc_core::Rotation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::encoder::EncoderConfig;
use super::network::{BackoffPolicy, ConnectionConfig};

/// Error type for loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

/// Where to connect and who we are.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `http`, `https`, `ws` or `wss` base address of the relay.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Host → SPKI pins.  Hosts not listed get plain WebPKI validation.
    #[serde(default)]
    pub pins: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Encoded frames held while the network catches up.
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_diagnostics_interval_ms")]
    pub diagnostics_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

/// Physical panel as currently oriented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_display_width")]
    pub width: u32,
    #[serde(default = "default_display_height")]
    pub height: u32,
    #[serde(default)]
    pub rotation: Rotation,
}

/// Size of the picture in the viewer until the server reports otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_width")]
    pub width: u32,
    #[serde(default = "default_viewer_height")]
    pub height: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:8080/agent".to_string()
}
fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_diagnostics_interval_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_outbound_queue() -> usize {
    256
}
fn default_display_width() -> u32 {
    1920
}
fn default_display_height() -> u32 {
    1080
}
fn default_viewer_width() -> u32 {
    1280
}
fn default_viewer_height() -> u32 {
    720
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            encoder: EncoderConfig::default(),
            buffer: BufferConfig::default(),
            connection: ConnectionSettings::default(),
            display: DisplayConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            device_id: String::new(),
            device_token: String::new(),
            session_id: None,
            pins: HashMap::new(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            diagnostics_interval_ms: default_diagnostics_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            outbound_queue: default_outbound_queue(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_display_width(),
            height: default_display_height(),
            rotation: Rotation::default(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: default_viewer_width(),
            height: default_viewer_height(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

impl AgentConfig {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Rejects values the agent cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server.device_id must be set".into()));
        }
        self.encoder
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("encoder: {e}")))?;
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer.capacity must be greater than zero".into()));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid("display dimensions must be non-zero".into()));
        }
        if self.viewer.width == 0 || self.viewer.height == 0 {
            return Err(ConfigError::Invalid("viewer dimensions must be non-zero".into()));
        }
        if self.connection.heartbeat_interval_ms == 0 || self.connection.diagnostics_interval_ms == 0
        {
            return Err(ConfigError::Invalid("connection intervals must be non-zero".into()));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        self.connection
            .backoff
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("connection.backoff: {e}")))?;
        Ok(())
    }

    /// Parameters for the [`ConnectionManager`](super::network::ConnectionManager).
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            server_url: self.server.base_url.clone(),
            device_id: self.server.device_id.clone(),
            device_token: self.server.device_token.clone(),
            session_id: self.server.session_id.clone(),
            pins: self.server.pins.clone(),
            heartbeat_interval: Duration::from_millis(self.connection.heartbeat_interval_ms),
            diagnostics_interval: Duration::from_millis(self.connection.diagnostics_interval_ms),
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            backoff: self.connection.backoff.clone(),
            outbound_queue: self.connection.outbound_queue,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        // Arrange / Act
        let cfg = AgentConfig::from_toml_str("").unwrap();

        // Assert
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.buffer.capacity, 30);
        assert_eq!(cfg.encoder.frame_rate, 30);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [encoder]
            width = 640

            [connection.backoff]
            initial = 250
            "#,
        )
        .unwrap();

        assert_eq!(cfg.encoder.width, 640);
        assert_eq!(cfg.encoder.height, 720);
        assert_eq!(cfg.connection.backoff.initial, Duration::from_millis(250));
        assert_eq!(cfg.connection.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_full_file_parses() {
        // Arrange
        let text = r#"
            log_level = "debug"

            [server]
            base_url = "https://relay.example.com/agent"
            device_id = "kiosk-1"
            device_token = "secret"
            session_id = "s-9"

            [server.pins]
            "relay.example.com" = ["sha256/47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="]

            [buffer]
            capacity = 10

            [display]
            width = 1080
            height = 1920
            rotation = "90"

            [viewer]
            width = 360
            height = 640
        "#;

        // Act
        let cfg = AgentConfig::from_toml_str(text).unwrap();
        let conn = cfg.connection_config();

        // Assert
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.display.rotation, Rotation::Rotation90);
        assert_eq!(cfg.buffer.capacity, 10);
        assert_eq!(conn.session_id.as_deref(), Some("s-9"));
        assert_eq!(conn.pins["relay.example.com"].len(), 1);
        assert_eq!(conn.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(
            AgentConfig::from_toml_str("[server\nbase_url ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_requires_device_id() {
        let cfg = AgentConfig::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("device_id")));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut base = AgentConfig::default();
        base.server.device_id = "d".into();

        let mut zero_capacity = base.clone();
        zero_capacity.buffer.capacity = 0;
        let mut zero_fps = base.clone();
        zero_fps.encoder.frame_rate = 0;
        let mut zero_viewer = base.clone();
        zero_viewer.viewer.width = 0;

        assert!(base.validate().is_ok());
        assert!(zero_capacity.validate().is_err());
        assert!(zero_fps.validate().is_err());
        assert!(zero_viewer.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_hot_reconnect_settings() {
        // Arrange
        let valid = |toml: &str| {
            let mut cfg = AgentConfig::from_toml_str(toml).unwrap();
            cfg.server.device_id = "d".into();
            cfg.validate()
        };

        // Act / Assert
        assert!(valid("").is_ok());
        assert!(valid("[connection.backoff]\ninitial = 0").is_err());
        assert!(valid("[connection.backoff]\ninitial = 5000\nmax = 1000").is_err());
        assert!(valid("[connection.backoff]\nmultiplier = 0.5").is_err());
        assert!(valid("[connection]\nconnect_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = AgentConfig::load(Path::new("/definitely/not/here/agent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
