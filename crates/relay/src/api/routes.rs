//! Event ingestion handlers: one POST route per event kind.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use shared::{BroadcastResponse, EventKind, RelayEvent};

use crate::api::AppState;
use crate::error::ApiError;
use crate::relay::ORDER_UPDATES;

pub fn ingestion_routes() -> Router<AppState> {
    EventKind::ALL
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.route(
                kind.route(),
                post(
                    move |state: State<AppState>, body: Result<Json<Value>, JsonRejection>| {
                        ingest(kind, state, body)
                    },
                ),
            )
        })
}

/// Validate the body's required fields for `kind` and fan the event out to
/// the order updates group. Nothing is broadcast on a validation failure.
async fn ingest(
    kind: EventKind,
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let Value::Object(body) = body else {
        return Err(ApiError::InvalidBody("expected a JSON object".to_string()));
    };
    let event = RelayEvent::from_body(kind, &body).map_err(|e| {
        tracing::warn!(event = kind.as_str(), error = %e, "rejected ingestion request");
        ApiError::from(e)
    })?;

    let recipients = state.relay.broadcast(ORDER_UPDATES, event);
    tracing::info!(event = kind.as_str(), recipients, "event broadcasted");

    Ok(Json(BroadcastResponse {
        success: true,
        message: format!("{} event broadcasted", kind.label()),
        clients: state.relay.connected_clients(),
    }))
}
