//! WebSocket endpoint: admit the client, then relay group events and answer pings.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use shared::{ClientMessage, ServerMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::api::AppState;
use crate::relay::{heartbeat, ConnectionHandle, RelayState, ORDER_UPDATES};

/// Transport-level keepalive. Unanswered pings never close the connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const WELCOME: &str = "Connected to order updates server";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<RelayState>) {
    let mut handle = relay.connect(ORDER_UPDATES);
    let reason = run_connection(socket, &mut handle).await;
    relay.disconnect(handle.id, reason);
}

/// Drive one connection until it ends; returns the disconnect reason.
async fn run_connection(socket: WebSocket, handle: &mut ConnectionHandle) -> &'static str {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let welcome = ServerMessage::ConnectionEstablished {
        message: WELCOME.to_string(),
        client_id: handle.id,
    };
    if let Err(e) = send_json(&mut ws_tx, &welcome).await {
        tracing::warn!(client_id = %handle.id, error = %e, "failed to send welcome");
        return "transport error";
    }

    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = reply_to(text.as_str()) {
                        if let Err(e) = send_json(&mut ws_tx, &reply).await {
                            tracing::warn!(client_id = %handle.id, error = %e, "send failed");
                            return "transport error";
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return "client disconnected",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(client_id = %handle.id, error = %e, "receive failed");
                    return "transport error";
                }
            },
            recv = handle.events.recv() => match recv {
                Ok(event) => {
                    if let Err(e) = send_json(&mut ws_tx, event.as_ref()).await {
                        tracing::warn!(client_id = %handle.id, error = %e, "send failed");
                        return "transport error";
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(client_id = %handle.id, skipped, "client lagging, events dropped");
                }
                Err(RecvError::Closed) => return "group closed",
            },
            _ = keepalive.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(axum::body::Bytes::new())).await {
                    tracing::warn!(client_id = %handle.id, error = %e, "send failed");
                    return "transport error";
                }
            }
            _ = handle.shutdown.wait() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                return "server shutdown";
            }
        }
    }
}

/// Reply for a client text frame, if any. Unknown frames are ignored.
fn reply_to(text: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping { timestamp }) => Some(heartbeat::pong(timestamp)),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring client message");
            None
        }
    }
}

async fn send_json<T: Serialize>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(text.into())).await
}
