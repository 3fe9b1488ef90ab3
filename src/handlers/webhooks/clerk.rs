//! Identity-provider webhook: keeps local user records in sync with
//! sign-ups. Deliveries are signed with the Svix scheme and may arrive
//! more than once; user creation is idempotent on the external id.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;
use serde::Deserialize;

use crate::billing;
use crate::db::{queries, AppState};
use crate::models::CreateUser;
use crate::providers::clerk::verify_webhook_signature;

use super::common::{db_error, WebhookResult};

#[derive(Debug, Deserialize)]
pub struct ClerkWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ClerkUserData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<ClerkEmailAddress>,
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClerkEmailAddress {
    pub id: String,
    pub email_address: String,
}

impl ClerkUserData {
    /// The primary address when marked, otherwise the first one on file.
    fn email(&self) -> Option<&str> {
        let primary = self.primary_email_address_id.as_ref().and_then(|primary| {
            self.email_addresses
                .iter()
                .find(|e| &e.id == primary)
        });
        primary
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.as_str())
    }
}

/// Create the user record for a sign-up event, granting the sign-up bonus
/// exactly once. Replayed deliveries find the existing row and do nothing.
pub fn process_user_created(
    conn: &mut Connection,
    clerk_user_id: &str,
    email: &str,
    bonus_credits: i64,
) -> WebhookResult {
    let (user, created) = match queries::get_or_create_user(
        conn,
        &CreateUser {
            clerk_user_id: clerk_user_id.to_string(),
            email: email.to_string(),
        },
    ) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Failed to create user for {}: {}", clerk_user_id, e);
            return db_error();
        }
    };

    if !created {
        return (StatusCode::OK, "User already exists");
    }

    if let Err(e) = billing::grant_signup_bonus(conn, &user.id, bonus_credits) {
        tracing::error!("Failed to grant signup bonus to {}: {}", user.id, e);
        return db_error();
    }

    tracing::info!(
        "User {} created for identity {} ({} bonus credit(s))",
        user.id,
        clerk_user_id,
        bonus_credits
    );

    (StatusCode::OK, "OK")
}

/// Axum handler for identity-provider webhooks.
pub async fn handle_clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(((msg_id, timestamp), signature)) = headers
        .get("svix-id")
        .and_then(|v| v.to_str().ok())
        .zip(headers.get("svix-timestamp").and_then(|v| v.to_str().ok()))
        .zip(headers.get("svix-signature").and_then(|v| v.to_str().ok()))
    else {
        return (StatusCode::BAD_REQUEST, "Missing signature headers");
    };

    match verify_webhook_signature(
        &state.clerk_webhook_secret,
        msg_id,
        timestamp,
        &body,
        signature,
    ) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) => {
            tracing::error!("Identity webhook signature verification error: {}", e);
            return (StatusCode::BAD_REQUEST, "Signature verification failed");
        }
    }

    let event: ClerkWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse identity webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    if event.event_type != "user.created" {
        return (StatusCode::OK, "Event ignored");
    }

    let user_data: ClerkUserData = match serde_json::from_value(event.data) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to parse user.created payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid user payload");
        }
    };

    let email = user_data.email().unwrap_or_default().to_string();

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return db_error();
        }
    };

    process_user_created(&mut conn, &user_data.id, &email, state.signup_bonus_credits)
}
