//! Handlers for `/generations` -- completed-job views and their images.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use easel_db::repositories::ImageRepo;
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::jobs::find_job;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct GenerationView {
    #[serde(flatten)]
    pub job: easel_db::models::job::Job,
    pub images: Vec<easel_db::models::image::GeneratedImageMeta>,
}

/// GET /generations/{id} -- a job together with its image records.
pub async fn get_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &id).await?;
    let images = ImageRepo::list_meta_by_job(&state.pool, &id).await?;
    Ok(Json(DataResponse {
        data: GenerationView { job, images },
    }))
}

/// GET /generations/{id}/images -- just the image records.
pub async fn list_generation_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    find_job(&state, &id).await?;
    let images = ImageRepo::list_meta_by_job(&state.pool, &id).await?;
    Ok(Json(DataResponse { data: images }))
}
