//! Shared wire types for the order relay: event kinds, WebSocket messages, HTTP bodies.

mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::{
    BroadcastResponse, ClientMessage, ErrorResponse, EventKind, HealthResponse, InfoResponse,
    MissingFields, RelayEvent, ServerMessage,
};
