use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The backend timed out or the connection failed.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered with an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A payload or session record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
        {
            AppError::BackendUnavailable(e.to_string())
        } else {
            AppError::Backend(e.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BackendUnavailable(ref msg) => {
                tracing::error!("Backend unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Session backend unavailable".to_string())
            }

            AppError::Backend(ref msg) => {
                tracing::error!("Backend error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Session backend error".to_string())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
