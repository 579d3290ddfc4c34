//! Pi-Deck realtime state hub — process bootstrap.
//!
//! Wires the seven core crates together: opens the persistent store, starts
//! the versioned-log commit worker, builds the workspace registry and
//! command router, and serves the WebSocket endpoint every browser tab
//! connects to.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use pideck_log::{LogConfig, LogService};
use pideck_sync::{ClientSession, CommandRouter, ClientTransport, SyncConfig};
use pideck_workspace::{MockAgentSessionFactory, WorkspaceRegistry};

#[derive(Parser, Debug)]
#[command(name = "pideck", about = "Realtime state hub for Pi-Deck")]
struct Cli {
    /// Path to a YAML config file, layered on top of the discovered search paths.
    #[arg(long, env = "PIDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Listening address, overrides the config file and PIDECK_LISTEN.
    #[arg(long)]
    listen: Option<String>,

    /// Directory holding sync.db, overrides the config file and PIDECK_STATE_DIR.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Restrict openWorkspace to paths under this root; may be repeated.
    /// Empty (the default) allows any path.
    #[arg(long = "allowed-root")]
    allowed_roots: Vec<PathBuf>,

    /// Increase log verbosity (stacks; also settable via PIDECK_LOG/RUST_LOG).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = pideck_config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = cli.listen {
        config.listen_addr = addr;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    if !cli.allowed_roots.is_empty() {
        config.allowed_roots = cli.allowed_roots;
    }

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;
    let db_path = config.state_dir.join("sync.db");

    let log_config = LogConfig {
        snapshot_every_deltas: config.log.snapshot_every_deltas,
        snapshot_every: Duration::from_secs(config.log.snapshot_every_secs),
        commit_latency_warn: Duration::from_millis(config.log.commit_latency_warn_ms),
    };

    // A corrupt store or a gap in the delta log is fatal here rather than
    // risk serving inconsistent state.
    let (log_service, log_handle) = LogService::open(&db_path, log_config)
        .with_context(|| format!("opening persistent store at {}", db_path.display()))?;
    tokio::spawn(log_service.run());

    let registry = Arc::new(WorkspaceRegistry::new(
        log_handle.clone(),
        config.allowed_roots.clone(),
        Arc::new(MockAgentSessionFactory),
    ));
    let router = Arc::new(CommandRouter::new(registry));

    let sync_config = SyncConfig {
        client_queue_max_deltas: config.sync.client_queue_max_deltas,
        client_queue_max_bytes: config.sync.client_queue_max_bytes,
        catch_up_batch_limit: config.sync.catch_up_batch_limit,
    };

    let state = Arc::new(AppState {
        log: log_handle,
        router,
        sync_config,
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, state_dir = %config.state_dir.display(), "pi-deck realtime state hub listening");
    axum::serve(listener, app).await.context("server loop exited")?;

    Ok(())
}

struct AppState {
    log: pideck_log::LogHandle,
    router: Arc<CommandRouter>,
    sync_config: SyncConfig,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let session = ClientSession::new(
            AxumTransport(socket),
            state.log.clone(),
            state.router.clone(),
            state.sync_config.clone(),
        );
        session.run().await;
    })
}

/// Adapts an axum [`WebSocket`] to [`ClientTransport`]; pings/pongs and
/// binary frames are swallowed since text JSON frames are this protocol's
/// only payload.
struct AxumTransport(WebSocket);

#[async_trait]
impl ClientTransport for AxumTransport {
    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.0.recv().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return None,
            }
        }
    }

    async fn send(&mut self, text: String) -> bool {
        self.0.send(Message::Text(text)).await.is_ok()
    }
}

/// Global tracing subscriber: `fmt` layer + `EnvFilter`, gated
/// by `PIDECK_LOG` falling back to `RUST_LOG`, falling back to `info` with
/// `-v`/`-vv` raising the default when neither is set.
fn init_logging(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = std::env::var("PIDECK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}
