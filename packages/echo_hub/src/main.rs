use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use hub_protocol::Encoding;
use std::future::Future;
use std::path::PathBuf;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod broadcast;
mod config;
mod error;
mod handlers;
mod hub;
mod metrics;
mod registry;
mod sink;
mod ws;

#[cfg(test)]
mod test_helpers;

use crate::config::{CliOverrides, FileConfig, HubConfig, ServerConfig};
use crate::error::HubError;
use crate::hub::Hub;
use crate::metrics::ServerMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "echo-hub")]
#[command(about = "Real-time echo hub: every EchoMessage is broadcast to all connected clients")]
struct Cli {
    /// Config file (defaults to ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Hub protocol clients must use: json or messagepack
    #[arg(short, long)]
    encoding: Option<Encoding>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub hub: Arc<Hub>,
}

pub(crate) fn build_router(state: AppState) -> Router {
    let hub_path = state.hub.config.path.clone();
    let negotiate_path = state.hub.config.negotiate_path();

    Router::new()
        // Hub endpoints
        .route(&hub_path, get(handlers::hub_websocket_handler))
        .route(&negotiate_path, post(handlers::negotiate_handler))
        .route("/api/connections", get(handlers::list_connections))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, HubError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| HubError::Bind { addr, source })
}

/// Serve until `shutdown` resolves, then close every hub connection.
pub(crate) async fn serve<F>(listener: TcpListener, hub: Arc<Hub>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(AppState { hub: hub.clone() });

    // Upgraded sockets are not tracked by axum, so the hub is told first.
    let signal_hub = hub.clone();
    let shutdown_signal = async move {
        shutdown.await;
        signal_hub.begin_shutdown();
    };

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    info!("Closing hub connections...");
    hub.shutdown().await;

    info!("Shutdown complete");
    server_result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_directive = if cli.debug {
        "echo_hub=debug,hub_protocol=debug,tower_http=debug,info"
    } else {
        "echo_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        encoding: cli.encoding,
    };
    let file_config: FileConfig = config::load_config(cli.config.as_deref(), &overrides)
        .extract()
        .context("Invalid configuration")?;
    let server_config = ServerConfig::from_file(&file_config.server)?;
    let hub_config = HubConfig::from_file(&file_config.hub)?;

    run_server(server_config, hub_config).await
}

async fn run_server(server_config: ServerConfig, hub_config: HubConfig) -> Result<()> {
    info!("Starting echo-hub");

    let metrics = Arc::new(ServerMetrics::new());
    let hub = Arc::new(Hub::new(Arc::new(hub_config), metrics));

    let listener = bind(server_config.bind_addr).await?;
    let actual_addr = listener.local_addr()?;

    let config = &hub.config;
    info!("echo-hub listening on http://{}", actual_addr);
    info!("Hub protocol: {} (version {})", config.encoding, config.encoding.version());
    info!("Endpoints:");
    info!("  GET    {:<24} - Hub WebSocket", config.path);
    info!("  POST   {:<24} - Negotiate", config.negotiate_path());
    info!("  GET    {:<24} - Registered connections", "/api/connections");
    info!("  GET    {:<24} - Health and metrics", "/health, /metrics");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    serve(listener, hub, shutdown_signal).await
}
