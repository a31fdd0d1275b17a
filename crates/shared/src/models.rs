//! Relay events, WebSocket messages and HTTP response bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of lifecycle event relayed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderCreated,
    OrderUpdated,
    OrderDeleted,
    OrderStatusChanged,
    OrderImageUploaded,
    OrderImageDeleted,
    OrderAssigned,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::OrderCreated,
        Self::OrderUpdated,
        Self::OrderDeleted,
        Self::OrderStatusChanged,
        Self::OrderImageUploaded,
        Self::OrderImageDeleted,
        Self::OrderAssigned,
        Self::CommentCreated,
        Self::CommentUpdated,
        Self::CommentDeleted,
    ];

    /// Wire name, used as the `type` tag of broadcast events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::OrderUpdated => "order_updated",
            Self::OrderDeleted => "order_deleted",
            Self::OrderStatusChanged => "order_status_changed",
            Self::OrderImageUploaded => "order_image_uploaded",
            Self::OrderImageDeleted => "order_image_deleted",
            Self::OrderAssigned => "order_assigned",
            Self::CommentCreated => "comment_created",
            Self::CommentUpdated => "comment_updated",
            Self::CommentDeleted => "comment_deleted",
        }
    }

    /// Ingestion path for this kind.
    pub fn route(&self) -> &'static str {
        match self {
            Self::OrderCreated => "/broadcast/order-created",
            Self::OrderUpdated => "/broadcast/order-updated",
            Self::OrderDeleted => "/broadcast/order-deleted",
            Self::OrderStatusChanged => "/broadcast/order-status-changed",
            Self::OrderImageUploaded => "/broadcast/order-image-uploaded",
            Self::OrderImageDeleted => "/broadcast/order-image-deleted",
            Self::OrderAssigned => "/broadcast/order-assigned",
            Self::CommentCreated => "/broadcast/comment-created",
            Self::CommentUpdated => "/broadcast/comment-updated",
            Self::CommentDeleted => "/broadcast/comment-deleted",
        }
    }

    /// Human-readable name used in ingestion responses.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OrderCreated => "Order created",
            Self::OrderUpdated => "Order updated",
            Self::OrderDeleted => "Order deleted",
            Self::OrderStatusChanged => "Order status changed",
            Self::OrderImageUploaded => "Order image uploaded",
            Self::OrderImageDeleted => "Order image deleted",
            Self::OrderAssigned => "Order assigned",
            Self::CommentCreated => "Comment created",
            Self::CommentUpdated => "Comment updated",
            Self::CommentDeleted => "Comment deleted",
        }
    }

    /// Fields an ingestion body must carry. They are also exactly the fields
    /// the broadcast event carries besides `type`.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::OrderCreated | Self::OrderUpdated => &["order"],
            Self::OrderDeleted => &["order_id"],
            Self::OrderStatusChanged => &["order_id", "old_status", "new_status", "order"],
            Self::OrderImageUploaded => &["order_id", "image", "order"],
            Self::OrderImageDeleted => &["order_id", "image_id", "order"],
            Self::OrderAssigned => &["order_id", "assigned_users", "order"],
            Self::CommentCreated | Self::CommentUpdated => &["order_id", "comment"],
            Self::CommentDeleted => &["order_id", "comment_id"],
        }
    }
}

/// Required fields absent from an ingestion body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing required fields: {}", .0.join(", "))]
pub struct MissingFields(pub Vec<&'static str>);

/// An event as delivered to clients: `{"type": <kind>, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RelayEvent {
    /// Build an event from an ingestion body, keeping only the kind's fields.
    /// A key that is missing or `null` counts as absent; values are otherwise
    /// taken as received.
    pub fn from_body(kind: EventKind, body: &Map<String, Value>) -> Result<Self, MissingFields> {
        let mut fields = Map::new();
        let mut missing = Vec::new();
        for &name in kind.required_fields() {
            match body.get(name) {
                Some(Value::Null) | None => missing.push(name),
                Some(v) => {
                    fields.insert(name.to_string(), v.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(MissingFields(missing));
        }
        Ok(Self { kind, fields })
    }
}

/// Server → client WebSocket messages (besides broadcast events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        message: String,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },
    Pong {
        timestamp: serde_json::Number,
    },
}

/// Client → server WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
}

// --- HTTP DTOs ---

/// Ingestion success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub message: String,
    pub clients: usize,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "connectedClients")]
    pub connected_clients: usize,
    pub uptime: f64,
}

/// `GET /` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub message: String,
    pub version: String,
    #[serde(rename = "connectedClients")]
    pub connected_clients: usize,
}
