mod checkout;
mod generate;
mod upload;
mod user;

pub use checkout::*;
pub use generate::*;
pub use upload::*;
pub use user::*;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde::Serialize;

use crate::billing;
use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{CreateUser, User};
use crate::providers::SessionIdentity;

/// Generation payloads are base64-encoded images; allow comfortably more
/// than the 10 MiB raw-image cap after encoding overhead.
const BODY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/checkout", post(create_checkout))
        .route("/api/generate", post(create_generation))
        .route("/api/generate/{id}", get(get_generation))
        .route("/api/upload", post(upload_file))
        .route("/api/user", get(current_user))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}

/// Resolve the local user for an authenticated identity, creating the row
/// (and granting the sign-up bonus) on first contact. Idempotent with the
/// identity-provider webhook: whichever path creates the row grants the
/// bonus, the other sees an existing row and skips it.
pub(crate) fn resolve_user(
    state: &AppState,
    conn: &mut Connection,
    identity: &SessionIdentity,
) -> Result<User> {
    let (user, created) = queries::get_or_create_user(
        conn,
        &CreateUser {
            clerk_user_id: identity.external_id.clone(),
            email: identity.email.clone().unwrap_or_default(),
        },
    )?;

    if created {
        billing::grant_signup_bonus(conn, &user.id, state.signup_bonus_credits)?;
        return Ok(queries::get_user_by_id(conn, &user.id)?.unwrap_or(user));
    }

    Ok(user)
}
