//! Relay Server - WebSocket front end for the chat relay hub
//!
//! Serves the upgrade endpoint, the bundled browser client and the health and
//! metrics probes. Connection state and routing live in `relay_hub`.

pub mod config;
mod handlers;
pub mod metrics;
mod views;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{Router, routing::get};
use relay_hub::HubHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::metrics::ServerMetrics;
use crate::ws::SocketContext;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub connection_config: Arc<ConnectionConfig>,
    pub metrics: Arc<ServerMetrics>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(hub: HubHandle, connection_config: ConnectionConfig, static_dir: PathBuf) -> Self {
        Self {
            hub,
            connection_config: Arc::new(connection_config),
            metrics: Arc::new(ServerMetrics::new()),
            static_dir,
        }
    }

    pub(crate) fn socket_context(&self) -> SocketContext {
        SocketContext {
            hub: self.hub.clone(),
            config: self.connection_config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

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

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(views::index_page))
        .route("/ws/{username}", get(handlers::websocket_handler))
        // Health and metrics endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .nest_service("/public", static_files)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
