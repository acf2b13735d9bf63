//! Mirror rows for the model config document.

use easel_core::status::{ExecMode, LoadMode};
use easel_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `models` table -- a snapshot of one config descriptor,
/// kept so external tooling can see the catalogue without parsing TOML.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModelRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub exec_mode: ExecMode,
    pub load_mode: LoadMode,
    pub api_url: Option<String>,
    pub port: Option<i64>,
    /// JSON array of capability strings.
    pub capabilities: String,
    pub registry_repo: Option<String>,
    pub updated_at: Timestamp,
}

/// DTO for upserting a model mirror row.
#[derive(Debug, Clone)]
pub struct UpsertModel {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub exec_mode: ExecMode,
    pub load_mode: LoadMode,
    pub api_url: Option<String>,
    pub port: Option<i64>,
    pub capabilities: Vec<String>,
    pub registry_repo: Option<String>,
}
