//! Model-download entity models and DTOs.

use easel_core::status::DownloadStatus;
use easel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from `model_downloads` -- the aggregate record for one multi-file
/// download.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModelDownload {
    pub id: String,
    pub repo: String,
    pub status: DownloadStatus,
    pub bytes_downloaded: i64,
    pub total_bytes: i64,
    pub speed_bps: Option<i64>,
    pub eta_secs: Option<i64>,
    pub error: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from `download_files` -- one file within a download.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DownloadFile {
    pub id: DbId,
    pub download_id: String,
    pub remote_path: String,
    pub dest_path: String,
    pub total_bytes: i64,
    pub downloaded_bytes: i64,
    pub complete: bool,
}

impl DownloadFile {
    /// Fraction of this file already on disk, when the total is known.
    pub fn progress(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
        } else {
            0.0
        }
    }
}

/// A planned file within a new download.
#[derive(Debug, Clone)]
pub struct NewDownloadFile {
    pub remote_path: String,
    pub dest_path: String,
    pub total_bytes: Option<i64>,
}
