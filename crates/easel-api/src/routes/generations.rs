//! Route definitions for the `/generations` resource.
//!
//! ```text
//! GET /{id}        -> get_generation
//! GET /{id}/images -> list_generation_images
//! ```

use axum::routing::get;
use axum::Router;

use crate::handlers::generations;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(generations::get_generation))
        .route("/{id}/images", get(generations::list_generation_images))
}
