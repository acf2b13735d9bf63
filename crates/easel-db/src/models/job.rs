//! Job entity model and DTOs.
//!
//! Queue state and completion record share one row: the status/progress
//! columns drive the queue while the timing/error columns are the history.

use easel_core::params::RequestedParams;
use easel_core::status::{JobStatus, JobType};
use easel_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
///
/// Source/mask blobs are intentionally not serialized; clients fetch image
/// bytes through the image endpoints.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub model_id: String,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub size: Option<String>,
    pub seed: Option<i64>,
    pub batch_size: i64,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub strength: Option<f64>,
    pub cfg_scale: Option<f64>,
    pub sample_steps: Option<i64>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<i64>,
    #[serde(skip_serializing)]
    pub source_image: Option<Vec<u8>>,
    pub source_image_mime: Option<String>,
    #[serde(skip_serializing)]
    pub mask_image: Option<Vec<u8>>,
    pub status: JobStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub model_loading_time_ms: Option<i64>,
    pub generation_time_ms: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Lift the user-supplied generation parameters for resolution against
    /// the model's defaults.
    pub fn requested_params(&self) -> RequestedParams {
        RequestedParams {
            size: self.size.clone(),
            seed: self.seed,
            batch_size: u32::try_from(self.batch_size).ok(),
            sample_steps: self.sample_steps.and_then(|v| u32::try_from(v).ok()),
            cfg_scale: self.cfg_scale,
            sampling_method: self.sampling_method.clone(),
            clip_skip: self.clip_skip.and_then(|v| u32::try_from(v).ok()),
            strength: self.strength,
        }
    }
}

/// DTO for inserting a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub model_id: String,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub size: Option<String>,
    pub seed: Option<i64>,
    pub batch_size: Option<i64>,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub strength: Option<f64>,
    pub cfg_scale: Option<f64>,
    pub sample_steps: Option<i64>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<i64>,
    pub source_image: Option<Vec<u8>>,
    pub source_image_mime: Option<String>,
    pub mask_image: Option<Vec<u8>>,
}

impl NewJob {
    /// A bare job of the given type against a model; optional fields are
    /// filled in by the caller.
    pub fn new(job_type: JobType, model_id: impl Into<String>) -> Self {
        Self {
            job_type,
            model_id: model_id.into(),
            prompt: None,
            negative_prompt: None,
            size: None,
            seed: None,
            batch_size: None,
            quality: None,
            style: None,
            strength: None,
            cfg_scale: None,
            sample_steps: None,
            sampling_method: None,
            clip_skip: None,
            source_image: None,
            source_image_mime: None,
            mask_image: None,
        }
    }
}

/// Filter/pagination parameters for job listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Per-status job counts for the queue view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}
