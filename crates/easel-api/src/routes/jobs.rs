//! Route definitions for the `/jobs` resource.
//!
//! ```text
//! POST   /generate   -> submit_generate
//! POST   /edit       -> submit_edit      (JSON or multipart)
//! POST   /variation  -> submit_variation (JSON or multipart)
//! POST   /upscale    -> submit_upscale
//! GET    /           -> list_jobs
//! GET    /{id}       -> get_job
//! DELETE /{id}       -> cancel_job (cancel-if-pending)
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(jobs::submit_generate))
        .route("/edit", post(jobs::submit_edit))
        .route("/variation", post(jobs::submit_variation))
        .route("/upscale", post(jobs::submit_upscale))
        .route("/", get(jobs::list_jobs))
        .route("/{id}", get(jobs::get_job).delete(jobs::cancel_job))
}
