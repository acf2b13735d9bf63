//! Repository for the `model_processes` table -- the durable shadow of the
//! in-memory process registry.

use chrono::Utc;
use easel_core::status::{ExecMode, ProcessStatus};

use crate::models::process::ProcessRow;
use crate::DbPool;

const COLUMNS: &str = "\
    model_id, pid, port, exec_mode, status, started_at, last_heartbeat_at, updated_at";

pub struct ProcessRepo;

impl ProcessRepo {
    /// Record a freshly spawned process (replacing any previous row for the
    /// model).
    pub async fn upsert(
        pool: &DbPool,
        model_id: &str,
        pid: Option<i64>,
        port: Option<i64>,
        exec_mode: ExecMode,
        status: ProcessStatus,
    ) -> Result<ProcessRow, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO model_processes \
                 (model_id, pid, port, exec_mode, status, started_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT (model_id) DO UPDATE SET \
                 pid = excluded.pid, \
                 port = excluded.port, \
                 exec_mode = excluded.exec_mode, \
                 status = excluded.status, \
                 started_at = excluded.started_at, \
                 last_heartbeat_at = NULL, \
                 updated_at = excluded.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProcessRow>(&query)
            .bind(model_id)
            .bind(pid)
            .bind(port)
            .bind(exec_mode)
            .bind(status)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Update the recorded status for a model's process.
    pub async fn set_status(
        pool: &DbPool,
        model_id: &str,
        status: ProcessStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE model_processes SET status = ?2, updated_at = ?3 WHERE model_id = ?1")
            .bind(model_id)
            .bind(status)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Stamp a heartbeat for a model's process.
    pub async fn heartbeat(pool: &DbPool, model_id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE model_processes SET last_heartbeat_at = ?2, updated_at = ?2 \
             WHERE model_id = ?1",
        )
        .bind(model_id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop the row for a model whose process is gone.
    pub async fn remove(pool: &DbPool, model_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM model_processes WHERE model_id = ?1")
            .bind(model_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// All recorded processes.
    pub async fn list(pool: &DbPool) -> Result<Vec<ProcessRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM model_processes ORDER BY model_id ASC");
        sqlx::query_as::<_, ProcessRow>(&query).fetch_all(pool).await
    }
}
