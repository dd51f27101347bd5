use anyhow::{Context, Result};
use clap::Parser;
use relay_hub::Hub;
use relay_server::config::{ConnectionConfig, FileConfig, ServerConfig, hub_config, load_config};
use relay_server::{AppState, build_router};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Real-time chat relay over WebSockets")]
struct Cli {
    /// Config file (TOML); missing files are ignored
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "relay=debug,relay_server=debug,relay_hub=debug,tower_http=debug,info"
    } else {
        "relay=info,relay_server=info,relay_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to read .env file: {}", e),
    }

    let file_config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let mut server_config = ServerConfig::from_file(&file_config.server);
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let connection_config = ConnectionConfig::from_file(&file_config.connection)
        .context("Invalid [connection] configuration")?;

    info!("Starting relay");
    info!(
        pong_wait = ?connection_config.pong_wait,
        ping_period = ?connection_config.ping_period,
        max_message_bytes = connection_config.max_message_bytes,
        outbound_capacity = connection_config.outbound_capacity,
        "Connection settings"
    );

    let hub = Hub::spawn(hub_config(&file_config.hub));
    let state = AppState::new(hub, connection_config, server_config.static_dir.clone());
    let app = build_router(state);

    let addr = server_config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Relay listening on http://{}", actual_addr);
    info!("");
    info!("Chat UI: http://{}/", actual_addr);
    info!("Endpoints:");
    info!("  GET    /ws/{{username}}   - WebSocket chat connection");
    info!("  GET    /public/*         - Static files from {}", server_config.static_dir.display());
    info!("  GET    /health           - Health status");
    info!("  GET    /health/live      - Liveness probe");
    info!("  GET    /metrics          - Server and hub counters");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received shutdown signal, stopping...");
    };

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
