//! Order relay: accepts order and comment lifecycle events over HTTP and fans
//! them out to every connected WebSocket client.

pub mod api;
pub mod config;
pub mod error;
pub mod relay;
