//! Ping/pong echo for client liveness checks.

use serde_json::Value;
use shared::ServerMessage;

/// Reply to a client ping. A numeric timestamp is echoed as-is; anything
/// else is replaced by the server clock in epoch milliseconds.
pub fn pong(timestamp: Option<Value>) -> ServerMessage {
    let timestamp = match timestamp {
        Some(Value::Number(n)) => n,
        _ => chrono::Utc::now().timestamp_millis().into(),
    };
    ServerMessage::Pong { timestamp }
}
