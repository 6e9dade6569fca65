//! rc-agent: device-side remote-control streaming agent.
//!
//! Streams the device screen to a relay server over a WebSocket and replays
//! the remote viewer's taps and swipes on the device.
//!
//! # Usage
//!
//! ```text
//! rc-agent [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>        TOML configuration file
//!       --base-url <URL>       Relay base address (http, https, ws, wss)
//!       --device-id <ID>       Device identifier
//!       --device-token <TOK>   Bearer token for the relay
//!       --session-id <ID>      Join an existing session
//!       --log-level <LEVEL>    error, warn, info, debug, trace
//!       --test-pattern         Stream a generated test pattern
//! ```
//!
//! Every option can also be set through the environment variable shown in
//! `--help`.  Command-line values override the file; `RUST_LOG` overrides
//! the log level.
//!
//! # Runtime layout
//!
//! ```text
//! TestPatternSource ─► VideoEncoder thread ─► pump ─► FrameBuffer ─► sender ─► ConnectionManager
//!                                                                                   │
//!                       LoggingInjector ◄── RouteInputUseCase ◄── dispatch loop ◄───┘
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rc_agent::application::route_input::RouteInputUseCase;
use rc_agent::application::stream_video::{run_encoder_pump, run_frame_sender, FrameSink};
use rc_agent::infrastructure::capture::TestPatternSource;
use rc_agent::infrastructure::config::AgentConfig;
use rc_agent::infrastructure::display::StaticDisplayMetrics;
use rc_agent::infrastructure::encoder::{EncoderInfo, VideoEncoder, ZstdDeltaBackend};
use rc_agent::infrastructure::input_injection::LoggingInjector;
use rc_agent::infrastructure::network::{ConnectionEvent, ConnectionManager, ConnectionState};
use rc_core::{DiagnosticsManager, FrameBuffer, FrameDropObserver, GestureMapper};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for each background task.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "rc-agent",
    about = "Device-side screen streaming and remote input agent",
    version
)]
struct Cli {
    /// TOML configuration file.  Without it every setting takes its default.
    #[arg(short, long, env = "RC_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Relay base address; `http(s)` is rewritten to `ws(s)`.
    #[arg(long, env = "RC_AGENT_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "RC_AGENT_DEVICE_ID")]
    device_id: Option<String>,

    #[arg(long, env = "RC_AGENT_DEVICE_TOKEN", hide_env_values = true)]
    device_token: Option<String>,

    /// Session to join; the server may assign a new one later.
    #[arg(long, env = "RC_AGENT_SESSION_ID")]
    session_id: Option<String>,

    #[arg(long, env = "RC_AGENT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Feed the encoder a generated pattern instead of a real screen.
    #[arg(long, env = "RC_AGENT_TEST_PATTERN")]
    test_pattern: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    fn load_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => AgentConfig::default(),
        };

        if let Some(url) = &self.base_url {
            config.server.base_url = url.clone();
        }
        if let Some(id) = &self.device_id {
            config.server.device_id = id.clone();
        }
        if let Some(token) = &self.device_token {
            config.server.device_token = token.clone();
        }
        if let Some(session) = &self.session_id {
            config.server.session_id = Some(session.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

// ── Event dispatch ────────────────────────────────────────────────────────────

type Router = RouteInputUseCase<Arc<LoggingInjector>>;

fn stream_properties(info: &EncoderInfo) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("codec".to_string(), info.codec.to_string()),
        ("width".to_string(), info.width.to_string()),
        ("height".to_string(), info.height.to_string()),
        ("frame_rate".to_string(), info.frame_rate.to_string()),
        ("bitrate".to_string(), info.bitrate.to_string()),
    ])
}

/// Reacts to one connection event.
fn dispatch(
    event: ConnectionEvent,
    encoder: &VideoEncoder,
    connection: &Arc<ConnectionManager>,
    router: &mut Router,
) {
    match event {
        ConnectionEvent::StateChanged(ConnectionState::Connected) => {
            // A viewer that (re)joins needs a keyframe to decode anything.
            encoder.request_keyframe();
            let connection = Arc::clone(connection);
            let properties = stream_properties(&encoder.get_encoder_info());
            tokio::spawn(async move {
                connection
                    .send_device_event("stream_started", properties)
                    .await;
            });
        }
        ConnectionEvent::StateChanged(state) => debug!(?state, "connection state"),
        ConnectionEvent::SessionStarted { session_id } => {
            info!(%session_id, "viewer session started");
            encoder.request_keyframe();
        }
        ConnectionEvent::RemoteInput(gesture) => {
            if let Err(e) = router.handle_gesture(&gesture) {
                warn!("remote gesture rejected: {e}");
            }
        }
        ConnectionEvent::ViewerResized { width, height } => {
            router.handle_viewer_resize(width, height);
        }
        ConnectionEvent::KeyframeRequested => encoder.request_keyframe(),
    }
}

async fn join_with_grace<T>(name: &str, mut handle: JoinHandle<T>) {
    if time::timeout(TASK_SHUTDOWN_GRACE, &mut handle).await.is_err() {
        warn!("{name} did not stop in time; aborting");
        handle.abort();
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate().context("invalid configuration")?;
    info!(
        server = %config.server.base_url,
        device = %config.server.device_id,
        "rc-agent starting"
    );

    // ── Shared state ──────────────────────────────────────────────────────────
    let diagnostics = Arc::new(DiagnosticsManager::new());
    let buffer = Arc::new(FrameBuffer::with_observer(
        config.buffer.capacity,
        Arc::clone(&diagnostics) as Arc<dyn FrameDropObserver>,
    ));
    let notify = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Video pipeline ────────────────────────────────────────────────────────
    let (encoder, encoder_events) =
        VideoEncoder::new(config.encoder.clone(), Box::new(ZstdDeltaBackend::new()));
    let encoder = Arc::new(encoder);
    let pump = tokio::spawn(run_encoder_pump(
        encoder_events,
        Arc::clone(&buffer),
        Arc::clone(&diagnostics),
        Arc::clone(&notify),
    ));
    if !encoder.start() {
        anyhow::bail!("video encoder failed to start");
    }

    // ── Connection ────────────────────────────────────────────────────────────
    let (connection, mut events) =
        ConnectionManager::new(config.connection_config(), Some(Arc::clone(&diagnostics)))
            .context("invalid connection settings")?;
    let connection = Arc::new(connection);
    connection.connect()?;

    let sender = tokio::spawn(run_frame_sender(
        Arc::clone(&buffer),
        Arc::clone(&connection) as Arc<dyn FrameSink>,
        Arc::clone(&diagnostics),
        Arc::clone(&notify),
        config.encoder.frame_rate,
        shutdown_rx.clone(),
    ));

    let capture = match (cli.test_pattern, encoder.input_surface()) {
        (true, Some(surface)) => Some(tokio::spawn(
            TestPatternSource::new(surface, config.encoder.frame_rate).run(shutdown_rx.clone()),
        )),
        (true, None) => {
            warn!("encoder has no input surface; test pattern disabled");
            None
        }
        (false, _) => {
            info!("no capture source attached; pass --test-pattern to stream a generated picture");
            None
        }
    };

    // ── Remote input ──────────────────────────────────────────────────────────
    let display = Arc::new(StaticDisplayMetrics::new(
        config.display.width,
        config.display.height,
        config.display.rotation,
    ));
    let mapper = GestureMapper::new(config.viewer.width, config.viewer.height, display);
    let mut router = RouteInputUseCase::new(mapper, Arc::new(LoggingInjector::new()));

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut stats = time::interval(Duration::from_millis(
        config.connection.diagnostics_interval_ms,
    ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => dispatch(event, &encoder, &connection, &mut router),
                None => break,
            },
            _ = stats.tick() => diagnostics.log_stats(),
            res = &mut ctrl_c => {
                match res {
                    Ok(()) => info!("received Ctrl+C; shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C: {e}"),
                }
                break;
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    shutdown_tx.send_replace(true);
    connection.disconnect();

    if let Some(capture) = capture {
        join_with_grace("capture", capture).await;
    }
    let stopping = Arc::clone(&encoder);
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("encoder shutdown task failed")?;
    // The pump ends once the last encoder handle (and its event sender) is gone.
    drop(encoder);
    join_with_grace("encoder pump", pump).await;
    join_with_grace("frame sender", sender).await;

    diagnostics.log_stats();
    info!("rc-agent stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
