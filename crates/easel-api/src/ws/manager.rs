use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use easel_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Control-frame queue depth per connection. Pings that do not fit are
/// dropped; the next heartbeat tick retries.
const CONTROL_BUFFER: usize = 16;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Sender for control frames (ping, close) pushed from outside the
    /// connection's own task.
    pub control: mpsc::Sender<Message>,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection; returns the control-frame receiver the
    /// connection task must drain.
    pub async fn add(&self, conn_id: String) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(CONTROL_BUFFER);
        let conn = WsConnection {
            control: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.control.try_send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify clients before the server
    /// stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.control.try_send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "closed all WebSocket connections");
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
