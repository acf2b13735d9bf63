//! Repository for `model_downloads` and `download_files`.
//!
//! The aggregate row and its file rows are written together on creation;
//! afterwards the download engine updates files as bytes land and refreshes
//! the aggregate on every progress flush.

use chrono::{Duration, Utc};
use easel_core::status::DownloadStatus;
use easel_core::types::DbId;
use uuid::Uuid;

use crate::models::download::{DownloadFile, ModelDownload, NewDownloadFile};
use crate::DbPool;

const COLUMNS: &str = "\
    id, repo, status, bytes_downloaded, total_bytes, speed_bps, eta_secs, \
    error, started_at, completed_at, created_at, updated_at";

const FILE_COLUMNS: &str = "\
    id, download_id, remote_path, dest_path, total_bytes, downloaded_bytes, complete";

pub struct DownloadRepo;

impl DownloadRepo {
    /// Create the aggregate record plus one row per file, all inside a
    /// transaction so a crash never leaves a record without its file list.
    pub async fn create(
        pool: &DbPool,
        repo: &str,
        files: &[NewDownloadFile],
    ) -> Result<ModelDownload, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let total: i64 = files.iter().filter_map(|f| f.total_bytes).sum();

        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO model_downloads \
                 (id, repo, status, total_bytes, started_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5) \
             RETURNING {COLUMNS}"
        );
        let download = sqlx::query_as::<_, ModelDownload>(&query)
            .bind(&id)
            .bind(repo)
            .bind(DownloadStatus::Downloading)
            .bind(total)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        for file in files {
            sqlx::query(
                "INSERT INTO download_files \
                     (download_id, remote_path, dest_path, total_bytes) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&id)
            .bind(&file.remote_path)
            .bind(&file.dest_path)
            .bind(file.total_bytes.unwrap_or(0))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(download)
    }

    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<ModelDownload>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM model_downloads WHERE id = ?1");
        sqlx::query_as::<_, ModelDownload>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List downloads newest-first.
    pub async fn list_all(
        pool: &DbPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModelDownload>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM model_downloads \
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        );
        sqlx::query_as::<_, ModelDownload>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// The file rows for a download, in insertion order (download order).
    pub async fn files(pool: &DbPool, download_id: &str) -> Result<Vec<DownloadFile>, sqlx::Error> {
        let query = format!(
            "SELECT {FILE_COLUMNS} FROM download_files WHERE download_id = ?1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, DownloadFile>(&query)
            .bind(download_id)
            .fetch_all(pool)
            .await
    }

    /// Update one file's byte counters.
    pub async fn update_file(
        pool: &DbPool,
        file_id: DbId,
        downloaded_bytes: i64,
        total_bytes: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE download_files SET downloaded_bytes = ?2, total_bytes = ?3 WHERE id = ?1",
        )
        .bind(file_id)
        .bind(downloaded_bytes)
        .bind(total_bytes)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Flag a file as fully downloaded.
    pub async fn mark_file_complete(pool: &DbPool, file_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE download_files \
             SET complete = 1, downloaded_bytes = MAX(downloaded_bytes, total_bytes) \
             WHERE id = ?1",
        )
        .bind(file_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refresh the aggregate counters on the download record.
    pub async fn update_aggregate(
        pool: &DbPool,
        id: &str,
        bytes_downloaded: i64,
        total_bytes: i64,
        speed_bps: Option<i64>,
        eta_secs: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE model_downloads \
             SET bytes_downloaded = ?2, total_bytes = ?3, speed_bps = ?4, \
                 eta_secs = ?5, updated_at = ?6 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(bytes_downloaded)
        .bind(total_bytes)
        .bind(speed_bps)
        .bind(eta_secs)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a download to a new status; terminal states stamp
    /// `completed_at`, failures record the error text.
    pub async fn set_status(
        pool: &DbPool,
        id: &str,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let completed_at = status.is_terminal().then_some(now);
        sqlx::query(
            "UPDATE model_downloads \
             SET status = ?2, error = ?3, completed_at = ?4, updated_at = ?5 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(completed_at)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete terminal records (and their file rows) older than `max_age`.
    /// Returns the number of records removed.
    pub async fn cleanup_older_than(pool: &DbPool, max_age: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            "DELETE FROM model_downloads \
             WHERE status IN (?1, ?2, ?3) AND updated_at < ?4",
        )
        .bind(DownloadStatus::Completed)
        .bind(DownloadStatus::Failed)
        .bind(DownloadStatus::Cancelled)
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
