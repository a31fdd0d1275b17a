//! HTTP API: status endpoints, event ingestion and the WebSocket endpoint.

mod routes;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::HeaderValue, routing::get, Json, Router};
use shared::{HealthResponse, InfoResponse};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::relay::RelayState;

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayState>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(relay: Arc<RelayState>, config: Arc<Config>) -> Self {
        Self {
            relay,
            config,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(info))
        .route("/health", get(health))
        .merge(routes::ingestion_routes())
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` anywhere in the list allows every origin.
fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(values)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connected_clients: state.relay.connected_clients(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        message: "Order relay WebSocket server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_clients: state.relay.connected_clients(),
    })
}
