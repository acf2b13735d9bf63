//! Route definition for `/images` -- stable binary image URLs.

use axum::routing::get;
use axum::Router;

use crate::handlers::images;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(images::get_image))
}
