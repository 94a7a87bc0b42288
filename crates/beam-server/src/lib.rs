//! HTTP surface of the registry: the `/registry` WebSocket and a health probe.

pub mod config;

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use beam_registry::Registry;
use beam_registry::connection;

#[derive(Clone)]
pub struct ServerState {
    pub registry: Registry,
    pub heartbeat: Duration,
}

impl ServerState {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            registry: Registry::new(),
            heartbeat,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/registry", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the registry on an already-bound listener until it fails.
pub async fn serve(listener: TcpListener, state: ServerState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.heartbeat)
    })
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "peers": state.registry.len().await,
    }))
}
