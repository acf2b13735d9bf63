//! WebSocket infrastructure for real-time events.
//!
//! Clients connect once, then opt into event topics with subscribe frames;
//! matching bus events are forwarded as JSON. A heartbeat task pings all
//! connections to surface stale ones.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
