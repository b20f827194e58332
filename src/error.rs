use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("password must be at least 6 characters long")]
    WeakCredential,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already registered with this email")]
    DuplicateIdentity,

    #[error("delivery already recorded for this order")]
    DuplicateDelivery,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("no delivery workers available")]
    NoWorkersAvailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::WeakCredential => (StatusCode::BAD_REQUEST, self.to_string()),
            // Never reveals whether the email or the password was wrong.
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::DuplicateIdentity | AppError::DuplicateDelivery => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, format!("invalid transition: {msg}"))
            }
            AppError::NoWorkersAvailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
