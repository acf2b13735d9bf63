//! Handlers for `/models/download` -- starting, inspecting, and cancelling
//! model downloads.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use easel_core::status::DownloadStatus;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDownloadRequest {
    pub repo: String,
    /// Files to fetch; empty means everything the registry lists.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadCreatedResponse {
    pub download_id: String,
    pub status: DownloadStatus,
}

/// POST /models/download
pub async fn create_download(
    State(state): State<AppState>,
    Json(input): Json<CreateDownloadRequest>,
) -> AppResult<impl IntoResponse> {
    if input.repo.trim().is_empty() {
        return Err(AppError::BadRequest("'repo' must not be empty".into()));
    }

    let record = state.downloads.start(&input.repo, &input.files).await?;
    tracing::info!(download_id = %record.id, repo = %record.repo, "model download enqueued");

    let response = DownloadCreatedResponse {
        download_id: record.id,
        status: record.status,
    };
    Ok((StatusCode::CREATED, Json(DataResponse { data: response })))
}

/// GET /models/download -- records newest-first, paginated.
pub async fn list_downloads(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    let downloads = state.downloads.all(limit, offset).await?;
    Ok(Json(DataResponse { data: downloads }))
}

/// GET /models/download/{id} -- aggregated view with per-file progress.
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let view = state.downloads.status(&id).await?;
    Ok(Json(DataResponse { data: view }))
}

/// DELETE /models/download/{id} -- cancel; partial files stay for resume.
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.downloads.cancel(&id).await?;
    tracing::info!(download_id = %id, "download cancel requested");
    Ok(Json(DataResponse { data: record }))
}
