//! Persisted view of supervised engine processes.

use easel_core::status::{ExecMode, ProcessStatus};
use easel_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from `model_processes` -- the durable shadow of the in-memory
/// process registry, one row per model.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessRow {
    pub model_id: String,
    pub pid: Option<i64>,
    pub port: Option<i64>,
    pub exec_mode: ExecMode,
    pub status: ProcessStatus,
    pub started_at: Timestamp,
    pub last_heartbeat_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}
