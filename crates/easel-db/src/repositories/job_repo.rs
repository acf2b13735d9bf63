//! Repository for the `jobs` table.
//!
//! Status writes go through the job state machine; the claim is a single
//! `UPDATE … WHERE id = (SELECT …) RETURNING` statement so two concurrently
//! polling processors can never select the same row.

use chrono::Utc;
use easel_core::state_machine;
use easel_core::status::JobStatus;
use uuid::Uuid;

use crate::models::job::{Job, JobListQuery, NewJob, QueueCounts};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, job_type, model_id, prompt, negative_prompt, size, seed, batch_size, \
    quality, style, strength, cfg_scale, sample_steps, sampling_method, clip_skip, \
    source_image, source_image_mime, mask_image, \
    status, progress, error, model_loading_time_ms, generation_time_ms, \
    created_at, updated_at, started_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides queue and history operations for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job with a random 128-bit id.
    pub async fn enqueue(pool: &DbPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let query = format!(
            "INSERT INTO jobs \
                 (id, job_type, model_id, prompt, negative_prompt, size, seed, batch_size, \
                  quality, style, strength, cfg_scale, sample_steps, sampling_method, clip_skip, \
                  source_image, source_image_mime, mask_image, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19, ?20, ?20) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&id)
            .bind(input.job_type)
            .bind(&input.model_id)
            .bind(&input.prompt)
            .bind(&input.negative_prompt)
            .bind(&input.size)
            .bind(input.seed)
            .bind(input.batch_size.unwrap_or(1))
            .bind(&input.quality)
            .bind(&input.style)
            .bind(input.strength)
            .bind(input.cfg_scale)
            .bind(input.sample_steps)
            .bind(&input.sampling_method)
            .bind(input.clip_skip)
            .bind(&input.source_image)
            .bind(&input.source_image_mime)
            .bind(&input.mask_image)
            .bind(JobStatus::Pending)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest pending job, moving it to `processing`
    /// and stamping `started_at`.
    ///
    /// The select-and-update is one statement, so concurrent claimants are
    /// serialized by SQLite's write lock and each job is handed out at most
    /// once.
    pub async fn claim_next(pool: &DbPool) -> Result<Option<Job>, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "UPDATE jobs \
             SET status = ?1, started_at = ?2, updated_at = ?2 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status = ?3 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing)
            .bind(now)
            .bind(JobStatus::Pending)
            .fetch_optional(pool)
            .await
    }

    /// Update progress. Progress never moves backwards: the stored value is
    /// the maximum of the current and incoming values.
    pub async fn set_progress(pool: &DbPool, id: &str, progress: f64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET progress = MAX(progress, ?2), updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(progress.clamp(0.0, 1.0))
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record how long the model took to become ready for this job.
    pub async fn set_model_loading_time(
        pool: &DbPool,
        id: &str,
        loading_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET model_loading_time_ms = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(loading_ms)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a job completed: progress 1.0, `completed_at` stamped, and the
    /// pure generation time recorded.
    pub async fn complete(
        pool: &DbPool,
        id: &str,
        generation_time_ms: i64,
    ) -> Result<Job, sqlx::Error> {
        Self::check_transition(pool, id, JobStatus::Completed).await?;

        let now = Utc::now();
        let query = format!(
            "UPDATE jobs \
             SET status = ?2, progress = 1.0, generation_time_ms = ?3, \
                 completed_at = ?4, updated_at = ?4 \
             WHERE id = ?1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Completed)
            .bind(generation_time_ms)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Mark a job failed with an error message.
    pub async fn fail(pool: &DbPool, id: &str, error: &str) -> Result<Job, sqlx::Error> {
        Self::check_transition(pool, id, JobStatus::Failed).await?;

        let now = Utc::now();
        let query = format!(
            "UPDATE jobs \
             SET status = ?2, error = ?3, completed_at = ?4, updated_at = ?4 \
             WHERE id = ?1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed)
            .bind(error)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Cancel a job. Only pending jobs are cancellable; returns `false`
    /// when the job had already left `pending`.
    pub async fn cancel(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = ?2, completed_at = ?3, updated_at = ?3 \
             WHERE id = ?1 AND status = ?4",
        )
        .bind(id)
        .bind(JobStatus::Cancelled)
        .bind(Utc::now())
        .bind(JobStatus::Pending)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs newest-first with optional status filter. Returns the page
    /// and the total match count.
    pub async fn list(
        pool: &DbPool,
        params: &JobListQuery,
    ) -> Result<(Vec<Job>, i64), sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let (jobs, total) = match params.status {
            Some(status) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM jobs WHERE status = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                );
                let jobs = sqlx::query_as::<_, Job>(&query)
                    .bind(status)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?;
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?1")
                        .bind(status)
                        .fetch_one(pool)
                        .await?;
                (jobs, total)
            }
            None => {
                let query = format!(
                    "SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                );
                let jobs = sqlx::query_as::<_, Job>(&query)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
                    .fetch_one(pool)
                    .await?;
                (jobs, total)
            }
        };

        Ok((jobs, total))
    }

    /// Count jobs in each status.
    pub async fn queue_counts(pool: &DbPool) -> Result<QueueCounts, sqlx::Error> {
        let rows: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            match status {
                JobStatus::Pending => counts.pending = n,
                JobStatus::Processing => counts.processing = n,
                JobStatus::Completed => counts.completed = n,
                JobStatus::Failed => counts.failed = n,
                JobStatus::Cancelled => counts.cancelled = n,
            }
        }
        Ok(counts)
    }

    /// Delete a job (its image rows cascade). Returns `false` if absent.
    pub async fn delete(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- private helpers ----

    /// Fetch the row and validate the requested transition against the job
    /// state machine before a status write.
    async fn check_transition(pool: &DbPool, id: &str, to: JobStatus) -> Result<(), sqlx::Error> {
        let job = Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        state_machine::validate_transition(job.status, to)
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))
    }
}
