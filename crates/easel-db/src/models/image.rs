//! Generated-image entity model and DTOs.

use easel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A full row from `generated_images`, blob included.
#[derive(Debug, Clone, FromRow)]
pub struct GeneratedImage {
    pub id: DbId,
    pub job_id: String,
    pub image_data: Option<Vec<u8>>,
    pub file_path: Option<String>,
    pub mime_type: String,
    pub image_index: i64,
    pub revised_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub created_at: Timestamp,
}

/// Metadata view without the blob, for listings and events.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GeneratedImageMeta {
    pub id: DbId,
    pub job_id: String,
    pub mime_type: String,
    pub image_index: i64,
    pub revised_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub created_at: Timestamp,
    /// Stable URL the blob is served from.
    pub url: String,
}

/// DTO for persisting one image out of an engine response.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub job_id: String,
    pub image_data: Vec<u8>,
    pub mime_type: String,
    pub image_index: i64,
    pub revised_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}
