//! Axum server wiring: routes, connection upgrades, lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::BrokerConfig;
use crate::http::recognize_handler;
use crate::session::{run_client_session, ClientParams};
use crate::state::BrokerState;
use crate::status::run_status_listener;
use crate::worker_link::run_worker_connection;

/// Build the router with all broker routes.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/client/ws/speech", get(client_ws_handler))
        .route("/client/ws/status", get(status_ws_handler))
        .route("/worker/ws/speech", get(worker_ws_handler))
        .route(
            "/client/dynamic/recognize",
            post(recognize_handler).put(recognize_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the broker. Returns a handle that keeps it alive.
pub async fn start(config: BrokerConfig) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("0.0.0.0:{}", config.port);
    let state = BrokerState::new(config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .ok();
    });

    tracing::info!(port = local_addr.port(), "Broker started");

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        _server: server,
    })
}

/// Handle returned by [`start`] — keeps the server task alive and exposes
/// the shared state for shutdown and inspection.
pub struct ServerHandle {
    pub port: u16,
    pub state: Arc<BrokerState>,
    _server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Ask every connection task to wind down; sessions run their
    /// cancellation protocol before releasing workers.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }
}

async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<BrokerState>>,
) -> impl IntoResponse {
    let params = client_params(&query);
    ws.on_upgrade(move |socket| run_client_session(socket, params, state))
}

async fn status_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BrokerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_status_listener(socket, state))
}

async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BrokerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket: WebSocket| run_worker_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<BrokerState>>) -> impl IntoResponse {
    let snapshot = state.status.snapshot();
    axum::Json(serde_json::json!({
        "status": "healthy",
        "num_workers_available": snapshot.num_workers_available,
        "num_requests_processed": snapshot.num_requests_processed,
    }))
}

fn client_params(query: &HashMap<String, String>) -> ClientParams {
    ClientParams {
        content_type: query.get("content-type").cloned(),
        user_id: query.get("user-id").cloned(),
        content_id: query.get("content-id").cloned(),
        in_call: query
            .get("in-call")
            .map(|v| matches!(v.as_str(), "true" | "1" | "yes"))
            .unwrap_or(false),
    }
}
