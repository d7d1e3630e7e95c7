//! Statecast server binary entry point
//!
//! Serves HTTP signaling for WebRTC data channel sessions and broadcasts the
//! merged world state to every connected peer.
//!
//! # Usage
//!
//! ```bash
//! # Many concurrent sessions keyed by channel id (default: 0.0.0.0:3001)
//! cargo run -p statecast-server -- --bind 0.0.0.0:3001
//!
//! # One global session, frontend page with placeholders filled in
//! cargo run -p statecast-server -- \
//!   --cardinality single \
//!   --index ./index.html \
//!   --host example.org:3001 \
//!   --ws wss://example.org:3001/ws
//!
//! # Configure STUN/TURN servers
//! cargo run -p statecast-server -- \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --turn-url turn:turn.example.org:3478 \
//!   --turn-username user \
//!   --turn-credential secret
//! ```

mod relay;
mod routes;

use clap::Parser;
use statecast_webrtc::{
    Cardinality, DataChannelMode, SignalingCoordinator, TurnServerConfig, WebRtcTransportConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::routes::{AppState, IndexPage};

/// Statecast Server
///
/// WebRTC signaling plus state broadcast over data channels.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the HTTP server listens on
    #[arg(long, default_value = "0.0.0.0:3001", env = "STATECAST_BIND")]
    bind: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "STATECAST_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN server url (turn: or turns:)
    #[arg(long, env = "STATECAST_TURN_URL")]
    turn_url: Option<String>,

    /// TURN username
    #[arg(long, default_value = "", env = "STATECAST_TURN_USERNAME")]
    turn_username: String,

    /// TURN credential
    #[arg(long, default_value = "", env = "STATECAST_TURN_CREDENTIAL")]
    turn_credential: String,

    /// Label of the data channel created for server offers
    #[arg(long, default_value = "state", env = "STATECAST_CHANNEL_LABEL")]
    channel_label: String,

    /// Data channel delivery mode
    #[arg(long, default_value = "reliable", env = "STATECAST_CHANNEL_MODE")]
    channel_mode: ChannelModeArg,

    /// One global session or many keyed by channel id
    #[arg(long, default_value = "many", env = "STATECAST_CARDINALITY")]
    cardinality: CardinalityArg,

    /// Maximum live sessions, 0 for unbounded
    #[arg(long, default_value_t = 0, env = "STATECAST_MAX_SESSIONS")]
    max_sessions: usize,

    /// HTML page served at `/`
    #[arg(long, default_value = "index.html", env = "STATECAST_INDEX")]
    index: PathBuf,

    /// Value substituted for `{host}` in the page
    #[arg(long, default_value = "", env = "HOST")]
    host: String,

    /// Value substituted for `{ws}` in the page
    #[arg(long, default_value = "", env = "WS")]
    ws: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ChannelModeArg {
    /// Ordered delivery with retransmits
    Reliable,
    /// Unordered delivery without retransmits
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CardinalityArg {
    /// A single global session
    Single,
    /// Many concurrent sessions
    Many,
}

impl Args {
    fn transport_config(&self) -> WebRtcTransportConfig {
        let turn_servers = self
            .turn_url
            .iter()
            .map(|url| TurnServerConfig {
                url: url.clone(),
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            })
            .collect();

        WebRtcTransportConfig {
            stun_servers: self.stun_servers.clone(),
            turn_servers,
            data_channel_label: self.channel_label.clone(),
            data_channel_mode: match self.channel_mode {
                ChannelModeArg::Reliable => DataChannelMode::Reliable,
                ChannelModeArg::Unreliable => DataChannelMode::Unreliable,
            },
            cardinality: match self.cardinality {
                CardinalityArg::Single => Cardinality::Single,
                CardinalityArg::Many => Cardinality::Many,
            },
            max_sessions: self.max_sessions,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handler before the runtime starts
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\n[SIGNAL] Ctrl+C received, initiating shutdown...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("[SIGNAL] Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("[WATCHDOG] Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("statecast-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Statecast server starting"
    );

    let config = args.transport_config();
    let coordinator = SignalingCoordinator::with_webrtc(&config)?;

    info!(
        bind = %args.bind,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        cardinality = ?config.cardinality,
        data_channel_mode = ?config.data_channel_mode,
        max_sessions = config.max_sessions,
        "Configuration loaded"
    );

    let state = AppState::new(
        coordinator.clone(),
        IndexPage::new(args.index.clone(), args.host.clone(), args.ws.clone()),
    );
    let router = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    let shutdown_future = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        info!("Shutdown signal received, stopping HTTP server...");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_future)
        .await?;

    coordinator.close_all().await;
    info!("Statecast server shut down gracefully");

    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_build_config() {
        let args = Args::parse_from([
            "statecast-server",
            "--stun-servers",
            "stun:a.example.org:3478,stun:b.example.org:3478",
            "--turn-url",
            "turn:turn.example.org:3478",
            "--turn-username",
            "user",
            "--turn-credential",
            "secret",
            "--channel-mode",
            "unreliable",
            "--cardinality",
            "single",
            "--max-sessions",
            "8",
        ]);

        let config = args.transport_config();
        assert_eq!(config.stun_servers.len(), 2);
        assert_eq!(config.turn_servers.len(), 1);
        assert_eq!(config.turn_servers[0].username, "user");
        assert_eq!(config.data_channel_mode, DataChannelMode::Unreliable);
        assert_eq!(config.cardinality, Cardinality::Single);
        assert_eq!(config.max_sessions, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["statecast-server"]);
        let config = args.transport_config();

        assert!(config.turn_servers.is_empty());
        assert_eq!(config.data_channel_label, "state");
        assert_eq!(config.cardinality, Cardinality::Many);
        assert_eq!(args.index, PathBuf::from("index.html"));
    }
}
