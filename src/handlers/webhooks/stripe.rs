//! Payment-provider webhook: credits purchased packages.
//!
//! Only `checkout.session.completed` mutates state. The dedup marker is
//! claimed in the same transaction as the credit grant, so replayed
//! deliveries of one event credit exactly once.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;

use crate::billing::{self, SettleOutcome};
use crate::catalog;
use crate::db::{queries, AppState};
use crate::providers::stripe::{StripeCheckoutSession, StripeWebhookEvent};

use super::common::{db_error, WebhookResult};

/// Credit a completed checkout session. Pure database logic, shared with
/// tests; signature verification happens in the HTTP handler.
pub fn process_checkout_completed(
    conn: &mut Connection,
    event_id: &str,
    session: &StripeCheckoutSession,
) -> WebhookResult {
    // Promotional codes can bring the total to zero; those sessions come
    // through as "no_payment_required" and still count.
    if session.payment_status != "paid" && session.payment_status != "no_payment_required" {
        return (StatusCode::OK, "Session not paid");
    }

    let Some(user_id) = session.metadata.user_id.as_deref() else {
        tracing::warn!("Checkout session {} has no user_id metadata", session.id);
        return (StatusCode::BAD_REQUEST, "Missing user_id in metadata");
    };
    let Some(package_id) = session.metadata.package_id.as_deref() else {
        tracing::warn!("Checkout session {} has no package_id metadata", session.id);
        return (StatusCode::BAD_REQUEST, "Missing package_id in metadata");
    };

    let Some(package) = catalog::find(package_id) else {
        tracing::warn!(
            "Checkout session {} references unknown package {}",
            session.id,
            package_id
        );
        return (StatusCode::BAD_REQUEST, "Unknown package");
    };

    let user = match queries::get_user_by_id(conn, user_id) {
        Ok(Some(u)) => u,
        Ok(None) => {
            tracing::warn!(
                "Checkout session {} references unknown user {}",
                session.id,
                user_id
            );
            return (StatusCode::BAD_REQUEST, "Unknown user");
        }
        Err(e) => {
            tracing::error!("DB error looking up user: {}", e);
            return db_error();
        }
    };

    // Payment intent is the durable payment reference; sessions without
    // one (zero-cost) fall back to the session id.
    let external_ref = session
        .payment_intent
        .clone()
        .unwrap_or_else(|| session.id.clone());

    match billing::grant_purchase(
        conn,
        &user.id,
        package.id,
        package.credits,
        &external_ref,
        ("stripe", event_id),
    ) {
        Ok(SettleOutcome::AlreadyProcessed) => (StatusCode::OK, "Already processed"),
        Ok(_) => {
            tracing::info!(
                "Credited {} credit(s) to {} for package {} (session {})",
                package.credits,
                user.id,
                package.id,
                session.id
            );
            (StatusCode::OK, "OK")
        }
        Err(e) => {
            tracing::error!("Failed to grant purchase: {}", e);
            db_error()
        }
    }
}

/// Axum handler for payment-provider webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing stripe-signature header");
    };

    match state.stripe.verify_webhook_signature(&body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => {
            tracing::error!("Payment webhook signature verification error: {}", e);
            return (StatusCode::BAD_REQUEST, "Signature verification failed");
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse payment webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    if event.event_type != "checkout.session.completed" {
        return (StatusCode::OK, "Event ignored");
    }

    let session: StripeCheckoutSession = match serde_json::from_value(event.data.object) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to parse checkout session: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid checkout session");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return db_error();
        }
    };

    process_checkout_completed(&mut conn, &event.id, &session)
}
