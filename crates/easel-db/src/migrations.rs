//! Schema creation and additive migrations.
//!
//! Every statement here is idempotent: tables are `CREATE TABLE IF NOT
//! EXISTS`, and columns added after the initial schema go through
//! [`add_column_if_missing`], which consults `PRAGMA table_info` first.
//! Running the full set on every startup is the migration strategy.

use crate::DbPool;

/// Apply the full schema to the given pool.
pub async fn run(pool: &DbPool) -> Result<(), sqlx::Error> {
    create_tables(pool).await?;
    apply_additive_columns(pool).await?;
    tracing::debug!("database schema up to date");
    Ok(())
}

async fn create_tables(pool: &DbPool) -> Result<(), sqlx::Error> {
    // Merged queue/history table: a job row carries its queue state and its
    // completion record so listing and live subscription read one shape.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS jobs (
            id                    TEXT PRIMARY KEY,
            job_type              TEXT NOT NULL,
            model_id              TEXT NOT NULL,
            prompt                TEXT,
            negative_prompt       TEXT,
            size                  TEXT,
            seed                  INTEGER,
            batch_size            INTEGER NOT NULL DEFAULT 1,
            quality               TEXT,
            style                 TEXT,
            strength              REAL,
            cfg_scale             REAL,
            sample_steps          INTEGER,
            sampling_method       TEXT,
            source_image          BLOB,
            source_image_mime     TEXT,
            mask_image            BLOB,
            status                TEXT NOT NULL DEFAULT 'pending',
            progress              REAL NOT NULL DEFAULT 0,
            error                 TEXT,
            model_loading_time_ms INTEGER,
            generation_time_ms    INTEGER,
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL,
            started_at            TEXT,
            completed_at          TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created
             ON jobs (status, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS generated_images (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id         TEXT NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
            image_data     BLOB,
            file_path      TEXT,
            mime_type      TEXT NOT NULL,
            image_index    INTEGER NOT NULL DEFAULT 0,
            revised_prompt TEXT,
            width          INTEGER,
            height         INTEGER,
            created_at     TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_generated_images_job
             ON generated_images (job_id, image_index)",
    )
    .execute(pool)
    .await?;

    // Mirror of the model config document, for cross-process visibility.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS models (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            description   TEXT,
            exec_mode     TEXT NOT NULL,
            load_mode     TEXT NOT NULL,
            api_url       TEXT,
            port          INTEGER,
            capabilities  TEXT NOT NULL DEFAULT '[]',
            registry_repo TEXT,
            updated_at    TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS model_processes (
            model_id          TEXT PRIMARY KEY,
            pid               INTEGER,
            port              INTEGER,
            exec_mode         TEXT NOT NULL,
            status            TEXT NOT NULL,
            started_at        TEXT NOT NULL,
            last_heartbeat_at TEXT,
            updated_at        TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS model_downloads (
            id               TEXT PRIMARY KEY,
            repo             TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'pending',
            bytes_downloaded INTEGER NOT NULL DEFAULT 0,
            total_bytes      INTEGER NOT NULL DEFAULT 0,
            speed_bps        INTEGER,
            error            TEXT,
            started_at       TEXT,
            completed_at     TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS download_files (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            download_id      TEXT NOT NULL REFERENCES model_downloads (id) ON DELETE CASCADE,
            remote_path      TEXT NOT NULL,
            dest_path        TEXT NOT NULL,
            total_bytes      INTEGER NOT NULL DEFAULT 0,
            downloaded_bytes INTEGER NOT NULL DEFAULT 0,
            complete         INTEGER NOT NULL DEFAULT 0,
            UNIQUE (download_id, remote_path)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Columns introduced after the initial schema shipped.
async fn apply_additive_columns(pool: &DbPool) -> Result<(), sqlx::Error> {
    add_column_if_missing(pool, "jobs", "clip_skip", "INTEGER").await?;
    add_column_if_missing(pool, "model_downloads", "eta_secs", "INTEGER").await?;
    Ok(())
}

/// Add a column only when the table does not already have it.
async fn add_column_if_missing(
    pool: &DbPool,
    table: &str,
    column: &str,
    ddl_type: &str,
) -> Result<(), sqlx::Error> {
    let existing: Vec<String> =
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .fetch_all(pool)
            .await?;

    if existing.iter().any(|c| c == column) {
        return Ok(());
    }

    tracing::info!(table, column, "adding column");
    sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}"))
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A file-backed database: every pooled connection must see one schema.
    async fn temp_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("easel.db").display());
        let pool = crate::create_pool(&url).await.expect("pool");
        (dir, pool)
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (_dir, pool) = temp_pool().await;
        run(&pool).await.expect("first run");
        run(&pool).await.expect("second run");
        run(&pool).await.expect("third run");
    }

    #[tokio::test]
    async fn additive_columns_present_after_run() {
        let (_dir, pool) = temp_pool().await;
        run(&pool).await.expect("migrate");

        let cols: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('jobs')")
                .fetch_all(&pool)
                .await
                .expect("pragma");
        assert!(cols.iter().any(|c| c == "clip_skip"));

        let cols: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('model_downloads')")
                .fetch_all(&pool)
                .await
                .expect("pragma");
        assert!(cols.iter().any(|c| c == "eta_secs"));
    }
}
