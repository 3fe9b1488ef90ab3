//! Shared webhook plumbing.
//!
//! Webhook endpoints answer plain text: providers only care about the
//! status code, and a fixed `&'static str` keeps response bodies free of
//! anything an attacker could reflect.

use axum::http::StatusCode;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Canned database-failure response; the provider will retry.
pub fn db_error() -> WebhookResult {
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}
