//! Error types for the upload server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (error_type, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("database_error", "Database error")
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                ("io_error", "IO error")
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("internal_error", "An internal error occurred")
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
