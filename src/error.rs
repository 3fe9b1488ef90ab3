use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Shared error message constants.
///
/// Centralized so handlers and tests agree on the exact wording.
pub mod msg {
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const GENERATION_NOT_FOUND: &str = "Generation not found";
    pub const PACKAGE_NOT_FOUND: &str = "Unknown credit package";
    pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
    pub const MISSING_FILE: &str = "Missing 'file' field in upload";
    pub const EMPTY_IMAGE: &str = "Image payload is empty";
    pub const INVALID_IMAGE_ENCODING: &str = "Image payload is not valid base64";
    pub const CREDIT_REFUNDED: &str = "Your credit has been refunded";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("Rate limited until {reset_at}")]
    RateLimited { reset_at: i64 },

    /// A generation failed after credits were already deducted. Carries the
    /// provider's error text; the refund has happened by the time this is
    /// constructed.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Session validation failed: {0}")]
    SessionInvalid(String),

    /// Object-storage failure. Unlike generic internal errors the provider
    /// text is surfaced, since upload callers are told what went wrong.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<i64>,
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details, reset_at) = match &self {
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "Not found", Some(msg.clone()), None)
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "Bad request",
                Some(msg.clone()),
                None,
            ),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None, None),
            AppError::InsufficientCredits => (
                StatusCode::PAYMENT_REQUIRED,
                msg::INSUFFICIENT_CREDITS,
                None,
                None,
            ),
            AppError::RateLimited { reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
                Some("Rate limit exceeded, try again later".to_string()),
                Some(*reset_at),
            ),
            AppError::GenerationFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Generation failed",
                Some(msg.clone()),
                None,
            ),
            AppError::SessionInvalid(msg) => {
                tracing::debug!("Session validation failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized", None, None)
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error",
                    Some(msg.clone()),
                    None,
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid JSON",
                    Some(e.to_string()),
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            reset_at,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Extension for turning `Option<T>` lookups into 404 errors.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}
