//! Handlers for the `/jobs` resource: submission (JSON or multipart),
//! listing, inspection, and cancel-if-pending.

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use easel_core::status::{JobStatus, JobType};
use easel_db::models::job::{Job, JobListQuery, NewJob, QueueCounts};
use easel_db::repositories::JobRepo;
use easel_engine::server_api::decode_b64_image;
use easel_events::{Event, Topic};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, Pagination};
use crate::state::AppState;

/// Submission body. JSON bodies carry the source image base64-encoded in
/// `image`; multipart bodies upload it as a file part of the same name.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobRequest {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub size: Option<String>,
    pub seed: Option<i64>,
    pub n: Option<i64>,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub strength: Option<f64>,
    pub cfg_scale: Option<f64>,
    pub sample_steps: Option<i64>,
    pub sampling_method: Option<String>,
    pub clip_skip: Option<i64>,
    pub image: Option<String>,
    pub mask: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub pagination: Pagination,
    pub counts: QueueCounts,
}

// ---------------------------------------------------------------------------
// POST /jobs/{generate,edit,variation,upscale}
// ---------------------------------------------------------------------------

pub async fn submit_generate(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<impl IntoResponse> {
    submit(state, JobType::Generate, request).await
}

pub async fn submit_edit(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<impl IntoResponse> {
    submit(state, JobType::Edit, request).await
}

pub async fn submit_variation(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<impl IntoResponse> {
    submit(state, JobType::Variation, request).await
}

pub async fn submit_upscale(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<impl IntoResponse> {
    submit(state, JobType::Upscale, request).await
}

async fn submit(
    state: AppState,
    job_type: JobType,
    request: Request,
) -> AppResult<impl IntoResponse> {
    let parsed = parse_submit_body(request).await?;
    let new_job = build_new_job(&state, job_type, parsed)?;

    // The model must exist before the job enters the queue.
    state.model_manager.descriptor(&new_job.model_id)?;

    let job = JobRepo::enqueue(&state.pool, &new_job).await?;

    state.event_bus.publish(
        Event::new(Topic::Queue, "job.enqueued").with_payload(serde_json::json!({
            "job_id": job.id,
            "job_type": job.job_type,
            "model_id": job.model_id,
        })),
    );
    tracing::info!(job_id = %job.id, job_type = %job.job_type, model_id = %job.model_id, "job enqueued");

    let response = JobCreatedResponse {
        job_id: job.id,
        status: job.status,
    };
    Ok((StatusCode::CREATED, Json(DataResponse { data: response })))
}

// ---------------------------------------------------------------------------
// GET /jobs
// ---------------------------------------------------------------------------

/// List jobs newest-first with pagination and per-status counts.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    let (jobs, total) = JobRepo::list(&state.pool, &params).await?;
    let counts = JobRepo::queue_counts(&state.pool).await?;

    Ok(Json(DataResponse {
        data: JobListResponse {
            jobs,
            pagination: Pagination::new(total, limit, offset),
            counts,
        },
    }))
}

// ---------------------------------------------------------------------------
// GET /jobs/{id}
// ---------------------------------------------------------------------------

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// DELETE /jobs/{id}
// ---------------------------------------------------------------------------

/// Cancel a job, allowed from `pending` only.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &id).await?;

    if !JobRepo::cancel(&state.pool, &id).await? {
        return Err(AppError::Conflict(format!(
            "job {id} is {} and can no longer be cancelled",
            job.status
        )));
    }

    state.event_bus.publish(
        Event::new(Topic::Queue, "job.cancelled")
            .with_payload(serde_json::json!({"job_id": id})),
    );
    tracing::info!(job_id = %id, "job cancelled");

    let job = find_job(&state, &id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) async fn find_job(state: &AppState, id: &str) -> AppResult<Job> {
    JobRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| {
            AppError::Core(easel_core::error::CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            })
        })
}

/// Accept either a JSON body or a multipart form with file parts.
async fn parse_submit_body(request: Request) -> AppResult<ParsedSubmit> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(format!("bad multipart body: {e}")))?;
        parse_multipart(multipart).await
    } else {
        let Json(body): Json<SubmitJobRequest> = Json::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(format!("bad JSON body: {e}")))?;

        let source_image = body
            .image
            .as_deref()
            .map(decode_b64_image)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let mask_image = body
            .mask
            .as_deref()
            .map(decode_b64_image)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        Ok(ParsedSubmit {
            fields: body,
            source_image,
            source_image_mime: None,
            mask_image,
        })
    }
}

struct ParsedSubmit {
    fields: SubmitJobRequest,
    source_image: Option<Vec<u8>>,
    source_image_mime: Option<String>,
    mask_image: Option<Vec<u8>>,
}

async fn parse_multipart(mut multipart: Multipart) -> AppResult<ParsedSubmit> {
    let mut fields = SubmitJobRequest::default();
    let mut source_image = None;
    let mut source_image_mime = None;
    let mut mask_image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("bad multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                source_image_mime = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("bad image upload: {e}")))?;
                source_image = Some(bytes.to_vec());
            }
            "mask" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("bad mask upload: {e}")))?;
                mask_image = Some(bytes.to_vec());
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("bad field '{name}': {e}")))?;
                apply_text_field(&mut fields, &name, text)?;
            }
        }
    }

    Ok(ParsedSubmit {
        fields,
        source_image,
        source_image_mime,
        mask_image,
    })
}

fn apply_text_field(fields: &mut SubmitJobRequest, name: &str, value: String) -> AppResult<()> {
    fn parse<T: std::str::FromStr>(name: &str, value: &str) -> AppResult<T> {
        value
            .parse()
            .map_err(|_| AppError::BadRequest(format!("field '{name}' has an invalid value")))
    }

    match name {
        "model" => fields.model = Some(value),
        "prompt" => fields.prompt = Some(value),
        "negative_prompt" => fields.negative_prompt = Some(value),
        "size" => fields.size = Some(value),
        "quality" => fields.quality = Some(value),
        "style" => fields.style = Some(value),
        "sampling_method" => fields.sampling_method = Some(value),
        "seed" => fields.seed = Some(parse(name, &value)?),
        "n" => fields.n = Some(parse(name, &value)?),
        "strength" => fields.strength = Some(parse(name, &value)?),
        "cfg_scale" => fields.cfg_scale = Some(parse(name, &value)?),
        "sample_steps" => fields.sample_steps = Some(parse(name, &value)?),
        "clip_skip" => fields.clip_skip = Some(parse(name, &value)?),
        other => {
            tracing::debug!(field = other, "ignoring unknown multipart field");
        }
    }
    Ok(())
}

/// Validate the submission against its job type and produce the insert DTO.
fn build_new_job(
    state: &AppState,
    job_type: JobType,
    parsed: ParsedSubmit,
) -> AppResult<NewJob> {
    let ParsedSubmit {
        fields,
        source_image,
        source_image_mime,
        mask_image,
    } = parsed;

    let model_id = fields
        .model
        .or_else(|| state.model_manager.default_descriptor().map(|m| m.id.clone()))
        .ok_or_else(|| {
            AppError::BadRequest("JobInvalid: 'model' is required and no default is configured".into())
        })?;

    let needs_prompt = matches!(
        job_type,
        JobType::Generate | JobType::Edit | JobType::Variation
    );
    if needs_prompt && fields.prompt.as_deref().unwrap_or("").trim().is_empty() {
        return Err(AppError::BadRequest("JobInvalid: 'prompt' is required".into()));
    }

    let needs_image = matches!(
        job_type,
        JobType::Edit | JobType::Variation | JobType::Upscale
    );
    if needs_image && source_image.is_none() {
        return Err(AppError::BadRequest(format!(
            "JobInvalid: '{job_type}' requires a source image"
        )));
    }

    if let Some(strength) = fields.strength {
        if !(0.0..=1.0).contains(&strength) {
            return Err(AppError::BadRequest(
                "JobInvalid: 'strength' must be within [0, 1]".into(),
            ));
        }
    }
    if let Some(size) = &fields.size {
        easel_core::params::parse_size(size).map_err(|e| AppError::BadRequest(e.to_string()))?;
    }

    let mut job = NewJob::new(job_type, model_id);
    job.prompt = fields.prompt;
    job.negative_prompt = fields.negative_prompt;
    job.size = fields.size;
    job.seed = fields.seed;
    job.batch_size = fields.n;
    job.quality = fields.quality;
    job.style = fields.style;
    job.strength = fields.strength;
    job.cfg_scale = fields.cfg_scale;
    job.sample_steps = fields.sample_steps;
    job.sampling_method = fields.sampling_method;
    job.clip_skip = fields.clip_skip;
    job.source_image = source_image;
    job.source_image_mime = source_image_mime;
    job.mask_image = mask_image;
    Ok(job)
}
