use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error kinds surfaced across the system.
///
/// Handlers and middleware return this sum; the `IntoResponse` impl is the
/// single place HTTP status codes and the error envelope are decided, so
/// gating layers can dispatch on the variant instead of duck-typing response
/// shapes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Validation error")]
    ValidationErrors(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },

    #[error("{0}")]
    FraudGate(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Cache error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid token")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

/// Error envelope: `{"status":"error", "message": ..., "details"?, "retryAfter"?}`.
#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details, retry_after) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None, None),
            AppError::ValidationErrors(errs) => (
                StatusCode::BAD_REQUEST,
                "Validation error".to_string(),
                Some(errs.to_string()),
                None,
            ),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None, None),
            AppError::Permission(msg) => (StatusCode::FORBIDDEN, msg.clone(), None, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None, None),
            AppError::RateLimited {
                message,
                retry_after,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                message.clone(),
                None,
                Some(*retry_after),
            ),
            AppError::FraudGate(msg) => (StatusCode::FORBIDDEN, msg.clone(), None, None),
            AppError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "Payment provider unavailable".to_string(),
                None,
                None,
            ),
            AppError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
                None,
                None,
            ),
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Config(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
                None,
            ),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let mut res = (
            status,
            Json(ErrorBody {
                status: "error",
                message,
                details,
                retry_after,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
