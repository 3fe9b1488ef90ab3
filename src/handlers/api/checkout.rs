use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::db::AppState;
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{AuthUser, Json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub package_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Hosted checkout page to redirect the user to.
    pub url: String,
    pub session_id: String,
}

/// `POST /api/checkout` - create a hosted checkout session for a credit
/// package. The local user id and package id ride along in session
/// metadata; the payment webhook reads them back to credit the purchase.
pub async fn create_checkout(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let mut conn = state.db.get()?;
    let user = super::resolve_user(&state, &mut conn, &identity)?;

    let package = catalog::find(&request.package_id).or_not_found(msg::PACKAGE_NOT_FOUND)?;

    let success_url = format!("{}/credits?checkout=success", state.base_url);
    let cancel_url = format!("{}/credits?checkout=cancelled", state.base_url);

    let (session_id, url) = state
        .stripe
        .create_checkout_session(&user.id, package, &success_url, &cancel_url)
        .await?;

    tracing::info!(
        "Checkout session {} created for {} (package {})",
        session_id,
        user.id,
        package.id
    );

    Ok(Json(CheckoutResponse { url, session_id }))
}
