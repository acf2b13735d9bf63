use std::sync::Arc;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: easel_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Engine lifecycle manager.
    pub model_manager: Arc<easel_engine::ModelManager>,
    /// Model download engine.
    pub downloads: Arc<easel_downloader::DownloadEngine>,
    /// Topic-scoped event bus.
    pub event_bus: Arc<easel_events::EventBus>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
}
