//! Route definitions, one module per resource.

pub mod events;
pub mod generations;
pub mod health;
pub mod images;
pub mod jobs;
pub mod models;

use axum::Router;

use crate::state::AppState;

/// All resource routes, mounted at the application root.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/generations", generations::router())
        .nest("/images", images::router())
        .nest("/models", models::router())
        .merge(events::router())
}
