//! Repository for the `generated_images` table.

use chrono::Utc;
use easel_core::types::DbId;

use crate::models::image::{GeneratedImage, GeneratedImageMeta, NewImage};
use crate::DbPool;

const COLUMNS: &str = "\
    id, job_id, image_data, file_path, mime_type, image_index, \
    revised_prompt, width, height, created_at";

/// Columns for the blob-free metadata view; `url` is derived.
const META_COLUMNS: &str = "\
    id, job_id, mime_type, image_index, revised_prompt, width, height, \
    created_at, '/images/' || id AS url";

/// CRUD for generated images.
pub struct ImageRepo;

impl ImageRepo {
    /// Persist one engine output, linked to its job.
    pub async fn append(pool: &DbPool, input: &NewImage) -> Result<GeneratedImage, sqlx::Error> {
        let query = format!(
            "INSERT INTO generated_images \
                 (job_id, image_data, mime_type, image_index, revised_prompt, \
                  width, height, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GeneratedImage>(&query)
            .bind(&input.job_id)
            .bind(&input.image_data)
            .bind(&input.mime_type)
            .bind(input.image_index)
            .bind(&input.revised_prompt)
            .bind(input.width)
            .bind(input.height)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Fetch a full image row including the blob.
    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<GeneratedImage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generated_images WHERE id = ?1");
        sqlx::query_as::<_, GeneratedImage>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a job's images (metadata only), in batch order.
    pub async fn list_meta_by_job(
        pool: &DbPool,
        job_id: &str,
    ) -> Result<Vec<GeneratedImageMeta>, sqlx::Error> {
        let query = format!(
            "SELECT {META_COLUMNS} FROM generated_images \
             WHERE job_id = ?1 ORDER BY image_index ASC"
        );
        sqlx::query_as::<_, GeneratedImageMeta>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
