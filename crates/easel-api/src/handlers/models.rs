//! Handlers for `/models` -- catalogue, per-model status, start/stop.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use easel_engine::manager::StartOptions;
use easel_engine::ModelDescriptor;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelView {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub running: bool,
    pub is_default: bool,
}

/// Query parameters for POST /models/{id}/start.
#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    /// Overrides the descriptor's startup timeout.
    pub timeout_ms: Option<u64>,
}

/// GET /models -- every configured model with its run state.
pub async fn list_models(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let default_id = state
        .model_manager
        .default_descriptor()
        .map(|m| m.id.clone());
    let running = state.model_manager.running();

    let models: Vec<ModelView> = state
        .model_manager
        .all()
        .iter()
        .map(|descriptor| ModelView {
            running: running.contains(&descriptor.id),
            is_default: Some(&descriptor.id) == default_id.as_ref(),
            descriptor: descriptor.clone(),
        })
        .collect();

    Ok(Json(DataResponse { data: models }))
}

/// GET /models/running -- ids of models with a live process.
pub async fn list_running(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.model_manager.running(),
    }))
}

/// GET /models/{id}
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let descriptor = state.model_manager.descriptor(&id)?.clone();
    let running = state.model_manager.running().contains(&id);
    let is_default = state
        .model_manager
        .default_descriptor()
        .map(|m| m.id == id)
        .unwrap_or(false);

    Ok(Json(DataResponse {
        data: ModelView {
            descriptor,
            running,
            is_default,
        },
    }))
}

/// GET /models/{id}/status -- process status, uptime, and recent engine logs.
pub async fn model_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state.model_manager.status(&id)?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /models/{id}/start
pub async fn start_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StartParams>,
) -> AppResult<impl IntoResponse> {
    let options = StartOptions {
        timeout_ms: params.timeout_ms,
    };
    state.model_manager.start(&id, options).await?;
    let status = state.model_manager.status(&id)?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /models/{id}/stop
pub async fn stop_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let stopped = state.model_manager.stop(&id).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({"model_id": id, "stopped": stopped}),
    }))
}
