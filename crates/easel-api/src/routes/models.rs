//! Route definitions for the `/models` resource.
//!
//! ```text
//! GET    /               -> list_models
//! GET    /running        -> list_running
//! POST   /download       -> create_download
//! GET    /download       -> list_downloads
//! GET    /download/{id}  -> get_download
//! DELETE /download/{id}  -> cancel_download
//! GET    /{id}           -> get_model
//! GET    /{id}/status    -> model_status
//! POST   /{id}/start     -> start_model
//! POST   /{id}/stop      -> stop_model
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{downloads, models};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(models::list_models))
        .route("/running", get(models::list_running))
        .route(
            "/download",
            post(downloads::create_download).get(downloads::list_downloads),
        )
        .route(
            "/download/{id}",
            get(downloads::get_download).delete(downloads::cancel_download),
        )
        .route("/{id}", get(models::get_model))
        .route("/{id}/status", get(models::model_status))
        .route("/{id}/start", post(models::start_model))
        .route("/{id}/stop", post(models::stop_model))
}
