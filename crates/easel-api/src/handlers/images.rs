//! Handler for `/images/{id}` -- binary image delivery.
//!
//! This path doubles as the stable static URL carried on image records.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use easel_core::error::CoreError;
use easel_core::types::DbId;
use easel_db::repositories::ImageRepo;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /images/{id} -- the stored bytes under their recorded MIME type.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let image = ImageRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Image",
                id: id.to_string(),
            })
        })?;

    // Blob-backed rows are the norm; path-backed rows are read on demand.
    let bytes = match (image.image_data, image.file_path) {
        (Some(bytes), _) => bytes,
        (None, Some(path)) => tokio::fs::read(&path).await.map_err(|e| {
            AppError::Internal(format!("stored image {path} is unreadable: {e}"))
        })?,
        (None, None) => {
            return Err(AppError::Internal(format!(
                "image {id} has neither blob nor file path"
            )));
        }
    };

    Ok(([(header::CONTENT_TYPE, image.mime_type)], bytes))
}
