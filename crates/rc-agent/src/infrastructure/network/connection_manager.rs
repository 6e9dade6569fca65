//! WebSocket connection to the relay server.
//!
//! # Tasks per connection (for beginners)
//!
//! ```text
//!                      ┌────────────── supervisor ──────────────┐
//!                      │ connect (timeout) → session → backoff  │
//!                      └─────────────────┬──────────────────────┘
//!                                        │ while connected
//!       ┌───────────────┬────────────────┼──────────────────┐
//!   heartbeat      diagnostics        reader            writer
//!   (interval)     (interval)     (server → agent)   (queue → socket)
//! ```
//!
//! Everything the agent sends goes through one bounded *outbound queue* that
//! only the writer task drains.  Timers use `try_send` on that queue, so a
//! stalled socket can never stall heartbeat accounting.
//!
//! Inbound messages are decoded by the reader and published as
//! [`ConnectionEvent`]s on the channel returned by [`ConnectionManager::new`].
//!
//! # State machine
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─ok─► Connected ─lost─► Reconnecting
//!                               ▲                                   │
//!                               └────────────── backoff ────────────┘
//! any state ─disconnect()─► Disconnected
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rc_core::clock;
use rc_core::protocol::{encode_video_frame, from_json, to_json, SequenceCounter};
use rc_core::{CodecType, DeviceMessage, DiagnosticsManager, EncodedFrame, RemoteGesture, ServerMessage};
use rustls::ClientConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::backoff::{Backoff, BackoffPolicy};
use super::pinning::{build_tls_config, CertificatePins, TlsSetupError};
use crate::application::stream_video::FrameSink;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect()` lets the tasks close the socket before aborting.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// How long a finished session waits for its writer to flush.
const WRITER_FLUSH_GRACE: Duration = Duration::from_millis(500);

const DEVICE_ID_HEADER: &str = "x-device-id";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Public types ──────────────────────────────────────────────────────────────

/// Errors returned when constructing or starting a [`ConnectionManager`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme {0:?}; expected http, https, ws or wss")]
    UnsupportedScheme(String),

    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsSetupError),

    #[error("connect() must be called from within a tokio runtime")]
    NoRuntime,
}

/// Why one connection attempt failed.  Logged and counted, never returned.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid handshake request: {0}")]
    Request(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("shutdown requested")]
    Shutdown,
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Relay base address; `http(s)` is rewritten to `ws(s)`.
    pub server_url: String,
    pub device_id: String,
    /// Sent as `Authorization: Bearer <token>` when non-empty.
    pub device_token: String,
    pub session_id: Option<String>,
    /// Host → SPKI pins (`sha256/<base64>`).
    pub pins: HashMap<String, Vec<String>>,
    pub heartbeat_interval: Duration,
    pub diagnostics_interval: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Messages that may wait for the writer task.
    pub outbound_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080/agent".to_string(),
            device_id: String::new(),
            device_token: String::new(),
            session_id: None,
            pins: HashMap::new(),
            heartbeat_interval: Duration::from_secs(5),
            diagnostics_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            outbound_queue: 256,
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events published to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// The server assigned a (new) session id.
    SessionStarted { session_id: String },
    RemoteInput(RemoteGesture),
    ViewerResized { width: u32, height: u32 },
    KeyframeRequested,
}

/// Rewrites `raw` into a `ws`/`wss` URL.
///
/// # Errors
///
/// Fails on unparseable input, a missing host, or a scheme other than
/// `http`, `https`, `ws` or `wss`.
pub fn normalize_server_url(raw: &str) -> Result<Url, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConnectionError::UnsupportedScheme(other.to_string())),
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to {scheme}")))?;
    Ok(url)
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    config: ConnectionConfig,
    base_url: Url,
    tls: Option<Arc<ClientConfig>>,
    diagnostics: Option<Arc<DiagnosticsManager>>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::Sender<ConnectionEvent>,
    outbound: Mutex<Option<mpsc::Sender<WsMessage>>>,
    session_id: Mutex<Option<String>>,
    last_connected_at_ms: AtomicU64,
    heartbeat_seq: SequenceCounter,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn shutdown_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

impl Shared {
    fn diag(&self, f: impl FnOnce(&DiagnosticsManager)) {
        if let Some(d) = &self.diagnostics {
            f(d);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!("connection event channel full; dropping {event:?}");
        }
    }

    /// Moves to `next`, publishing the change and keeping the connection
    /// counters in step.  Exactly one caller observes each transition.
    /// Returns the previous state.
    fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return previous;
        }
        if next == ConnectionState::Connected {
            self.diag(DiagnosticsManager::record_connection_start);
        } else if previous == ConnectionState::Connected {
            self.diag(DiagnosticsManager::record_disconnection);
        }
        debug!(?previous, ?next, "connection state changed");
        self.emit(ConnectionEvent::StateChanged(next));
        previous
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn connection_url(&self) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("device_id", &self.config.device_id);
            if let Some(session) = lock(&self.session_id).as_deref() {
                query.append_pair("session_id", session);
            }
        }
        url
    }

    /// Queues `msg` for the writer, waiting for queue space.
    async fn enqueue(&self, msg: WsMessage) {
        let Some(tx) = lock(&self.outbound).clone() else {
            return;
        };
        if tx.send(msg).await.is_err() {
            self.diag(DiagnosticsManager::record_network_error);
        }
    }

    fn heartbeat_message(&self) -> Option<WsMessage> {
        let msg = DeviceMessage::Heartbeat {
            seq: self.heartbeat_seq.next(),
            timestamp_ms: clock::unix_ms(),
        };
        to_json(&msg).ok().map(WsMessage::Text)
    }

    fn diagnostics_message(&self) -> Option<WsMessage> {
        let report = self.diagnostics.as_ref()?.get_diagnostics_report();
        match to_json(&DeviceMessage::Diagnostics { report }) {
            Ok(json) => Some(WsMessage::Text(json)),
            Err(e) => {
                warn!("failed to serialize diagnostics report: {e}");
                None
            }
        }
    }

    // ── Supervisor ───────────────────────────────────────────────────────────

    async fn supervise(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let mut retrying = false;

        while !shutdown_requested(&shutdown) {
            self.set_state(ConnectionState::Connecting);

            match self.open_socket(&mut shutdown).await {
                Ok(ws) => {
                    if retrying {
                        self.diag(DiagnosticsManager::record_successful_reconnect);
                    }
                    retrying = false;
                    backoff.reset();
                    self.last_connected_at_ms
                        .store(clock::unix_ms(), Ordering::Relaxed);
                    info!(url = %self.base_url, "connected to relay server");
                    self.run_session(ws, shutdown.clone()).await;
                }
                Err(AttemptError::Shutdown) => break,
                Err(e) => {
                    warn!("connection attempt failed: {e}");
                    self.diag(DiagnosticsManager::record_network_error);
                }
            }

            if shutdown_requested(&shutdown) {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            self.diag(DiagnosticsManager::record_reconnect_attempt);
            retrying = true;
            let delay = backoff.next_delay();
            info!(attempt = backoff.attempt(), ?delay, "reconnecting after backoff");

            tokio::select! {
                _ = time::sleep(delay) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("connection supervisor exiting");
    }

    async fn open_socket(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WsStream, AttemptError> {
        let url = self.connection_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AttemptError::Request(e.to_string()))?;

        let headers = request.headers_mut();
        if !self.config.device_token.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.device_token))
                .map_err(|e| AttemptError::Request(e.to_string()))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        let device_id = HeaderValue::from_str(&self.config.device_id)
            .map_err(|e| AttemptError::Request(e.to_string()))?;
        headers.insert(DEVICE_ID_HEADER, device_id);

        let connector = self.tls.clone().map(Connector::Rustls);
        let limit = self.config.connect_timeout;
        debug!(%url, "opening WebSocket");

        tokio::select! {
            res = timeout(limit, connect_async_tls_with_config(request, None, false, connector)) => {
                match res {
                    Ok(Ok((ws, _response))) => Ok(ws),
                    Ok(Err(e)) => Err(AttemptError::Handshake(e)),
                    Err(_) => Err(AttemptError::Timeout(limit)),
                }
            }
            _ = shutdown.changed() => Err(AttemptError::Shutdown),
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    async fn run_session(self: &Arc<Self>, ws: WsStream, mut shutdown: watch::Receiver<bool>) {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(self.config.outbound_queue.max(1));
        *lock(&self.outbound) = Some(out_tx.clone());
        self.set_state(ConnectionState::Connected);

        // Writer: the only task touching the socket's write half.
        let writer = {
            let shared = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = out_rx.recv() => {
                            let Some(msg) = msg else { break };
                            let closing = matches!(msg, WsMessage::Close(_));
                            if let Err(e) = sink.send(msg).await {
                                warn!("WebSocket write failed: {e}");
                                shared.diag(DiagnosticsManager::record_network_error);
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                let _ = sink.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                }
                let _ = sink.close().await;
            })
        };

        let heartbeat = {
            let shared = Arc::clone(self);
            let tx = out_tx.clone();
            tokio::spawn(async move {
                let mut ticker = time::interval(shared.config.heartbeat_interval);
                loop {
                    ticker.tick().await;
                    let Some(msg) = shared.heartbeat_message() else { continue };
                    match tx.try_send(msg) {
                        Ok(()) => shared.diag(DiagnosticsManager::record_heartbeat),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!("outbound queue full; heartbeat skipped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            })
        };

        let reporter = self.diagnostics.as_ref().map(|_| {
            let shared = Arc::clone(self);
            let tx = out_tx.clone();
            tokio::spawn(async move {
                let period = shared.config.diagnostics_interval;
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let Some(msg) = shared.diagnostics_message() else { continue };
                    if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(msg) {
                        break;
                    }
                }
            })
        });

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_text(&text, &out_tx),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read failed: {e}");
                        self.diag(DiagnosticsManager::record_network_error);
                        break;
                    }
                    None => break,
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        lock(&self.outbound).take();
        heartbeat.abort();
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        drop(out_tx);

        let mut writer = writer;
        if timeout(WRITER_FLUSH_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
        info!("connection session ended");
    }

    fn handle_text(&self, text: &str, out_tx: &mpsc::Sender<WsMessage>) {
        let msg: ServerMessage = match from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("ignoring malformed server message: {e}");
                return;
            }
        };

        match msg {
            ServerMessage::StartSession { session_id } => {
                info!(%session_id, "session started by server");
                *lock(&self.session_id) = Some(session_id.clone());
                let ack = DeviceMessage::SessionAck {
                    session_id: session_id.clone(),
                };
                match to_json(&ack) {
                    Ok(json) => {
                        if out_tx.try_send(WsMessage::Text(json)).is_err() {
                            self.diag(DiagnosticsManager::record_network_error);
                        }
                    }
                    Err(e) => warn!("failed to serialize session ack: {e}"),
                }
                self.emit(ConnectionEvent::SessionStarted { session_id });
            }
            ServerMessage::Input { gesture } => {
                debug!(kind = gesture.kind(), "remote input received");
                self.emit(ConnectionEvent::RemoteInput(gesture));
            }
            ServerMessage::ViewerResize { width, height } => {
                self.emit(ConnectionEvent::ViewerResized { width, height });
            }
            ServerMessage::RequestKeyframe => self.emit(ConnectionEvent::KeyframeRequested),
            ServerMessage::HeartbeatAck { seq } => debug!(seq, "heartbeat acknowledged"),
        }
    }
}

// ── ConnectionManager ─────────────────────────────────────────────────────────

/// Owns the connection supervisor and exposes the send API.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Validates `config` and creates a disconnected manager.
    ///
    /// Returns the manager and the receiver for its [`ConnectionEvent`]s.
    /// Dropping the receiver is allowed; events are then discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] for a malformed or unsupported server URL,
    /// an empty device id, a malformed pin, or a TLS setup failure.
    pub fn new(
        config: ConnectionConfig,
        diagnostics: Option<Arc<DiagnosticsManager>>,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>), ConnectionError> {
        let base_url = normalize_server_url(&config.server_url)?;
        if config.device_id.trim().is_empty() {
            return Err(ConnectionError::EmptyDeviceId);
        }

        let pins = CertificatePins::from_table(&config.pins)?;
        let tls = if base_url.scheme() == "wss" {
            Some(build_tls_config(pins)?)
        } else {
            if !pins.is_empty() {
                warn!("certificate pins configured but server URL is not TLS; pins unused");
            }
            None
        };

        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            session_id: Mutex::new(config.session_id.clone()),
            config,
            base_url,
            tls,
            diagnostics,
            state_tx,
            events,
            outbound: Mutex::new(None),
            last_connected_at_ms: AtomicU64::new(0),
            heartbeat_seq: SequenceCounter::new(),
        });

        Ok((
            Self {
                shared,
                shutdown_tx,
                supervisor: Mutex::new(None),
            },
            events_rx,
        ))
    }

    /// Starts the connection supervisor on the current tokio runtime.
    ///
    /// Calling it again while the supervisor is running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoRuntime`] outside a tokio runtime.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;

        let mut supervisor = lock(&self.supervisor);
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        self.shutdown_tx.send_replace(false);
        let shutdown = self.shutdown_tx.subscribe();
        let shared = Arc::clone(&self.shared);
        info!(url = %self.shared.base_url, "starting connection supervisor");
        *supervisor = Some(runtime.spawn(shared.supervise(shutdown)));
        Ok(())
    }

    /// Stops the connection and records a disconnection.
    ///
    /// Safe to call repeatedly and without a prior `connect()`.  Returns
    /// without waiting: the socket gets a bounded grace period to close
    /// before its tasks are aborted.
    pub fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);

        if let Some(tx) = lock(&self.shared.outbound).take() {
            let _ = tx.try_send(WsMessage::Close(None));
        }

        if let Some(mut handle) = lock(&self.supervisor).take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                            handle.abort();
                        }
                    });
                }
                Err(_) => handle.abort(),
            }
            info!("disconnect requested");
        }

        // An explicit disconnect is always counted, connected or not.
        if self.shared.set_state(ConnectionState::Disconnected) != ConnectionState::Connected {
            self.shared.diag(DiagnosticsManager::record_disconnection);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel that always holds the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Current session id (configured or server-assigned).
    pub fn session_id(&self) -> Option<String> {
        lock(&self.shared.session_id).clone()
    }

    /// Wall-clock time of the last successful handshake (ms since the Unix
    /// epoch), or `None` if never connected.
    pub fn last_connected_at_ms(&self) -> Option<u64> {
        match self.shared.last_connected_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// The URL the next handshake will use.
    pub fn connection_url(&self) -> Url {
        self.shared.connection_url()
    }

    /// Wraps `payload` in a frame stamped now and sends it.
    pub async fn send_video_frame(&self, payload: Vec<u8>, is_key_frame: bool, codec: CodecType) {
        self.send_encoded_frame(&EncodedFrame::new(payload, is_key_frame, codec))
            .await;
    }

    /// Sends one frame as a binary message.  No-op when not connected.
    pub async fn send_encoded_frame(&self, frame: &EncodedFrame) {
        if !self.is_connected() {
            return;
        }
        match encode_video_frame(frame) {
            Ok(bytes) => self.shared.enqueue(WsMessage::Binary(bytes)).await,
            Err(e) => {
                warn!("failed to frame video payload: {e}");
                self.shared.diag(DiagnosticsManager::record_network_error);
            }
        }
    }

    /// Sends a named device event.  No-op when not connected.
    pub async fn send_device_event(&self, name: &str, properties: BTreeMap<String, String>) {
        if !self.is_connected() {
            return;
        }
        let msg = DeviceMessage::DeviceEvent {
            name: name.to_string(),
            properties,
        };
        match to_json(&msg) {
            Ok(json) => self.shared.enqueue(WsMessage::Text(json)).await,
            Err(e) => {
                warn!("failed to serialize device event {name}: {e}");
                self.shared.diag(DiagnosticsManager::record_network_error);
            }
        }
    }

    /// Sends the current diagnostics report.  No-op when not connected or
    /// when no diagnostics manager is attached.
    pub async fn send_diagnostics_report(&self) {
        if !self.is_connected() {
            return;
        }
        if let Some(msg) = self.shared.diagnostics_message() {
            self.shared.enqueue(msg).await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[async_trait]
impl FrameSink for ConnectionManager {
    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    async fn send_frame(&self, frame: EncodedFrame) {
        self.send_encoded_frame(&frame).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
