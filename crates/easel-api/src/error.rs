use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use easel_core::error::CoreError;
use easel_downloader::DownloadError;
use easel_engine::EngineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of each layer and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A well-formed request in an unprocessable state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Anything unexpected; details are logged, not leaked.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Engine(engine) => classify_engine_error(engine),
            AppError::Download(download) => classify_download_error(download),
            AppError::Database(err) => classify_sqlx_error(err),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_engine_error(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::UnknownModel(_) => (StatusCode::NOT_FOUND, "UNKNOWN_MODEL", err.to_string()),
        EngineError::AlreadyRunning(_) => {
            (StatusCode::CONFLICT, "ALREADY_RUNNING", err.to_string())
        }
        EngineError::StartupTimeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "STARTUP_TIMEOUT", err.to_string())
        }
        EngineError::PortExhausted(..) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PORT_EXHAUSTED", err.to_string())
        }
        EngineError::Config(_) => {
            tracing::error!(error = %err, "engine config error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        _ => (StatusCode::BAD_GATEWAY, "ENGINE_ERROR", err.to_string()),
    }
}

fn classify_download_error(err: &DownloadError) -> (StatusCode, &'static str, String) {
    match err {
        DownloadError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        DownloadError::Cancelled => (StatusCode::CONFLICT, "CANCELLED", err.to_string()),
        _ => (StatusCode::BAD_GATEWAY, "DOWNLOAD_ERROR", err.to_string()),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// `RowNotFound` maps to 404, unique-constraint violations to 409, and
/// everything else to a sanitized 500.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return (
                    StatusCode::CONFLICT,
                    "CONFLICT",
                    "Duplicate value violates a unique constraint".to_string(),
                );
            }
            tracing::error!(error = %db_err, "database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
