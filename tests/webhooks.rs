//! Webhook signature verification and processing tests for all three
//! providers: payment, inference, and identity.

mod common;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use common::*;
use magicroom::handlers::webhooks::replicate::{
    apply_prediction_update, handle_replicate_webhook, ApplyOutcome, PredictionUpdate,
};
use magicroom::handlers::webhooks::stripe::{handle_stripe_webhook, process_checkout_completed};
use magicroom::handlers::webhooks::clerk::process_user_created;
use magicroom::providers::clerk;
use magicroom::providers::replicate;
use magicroom::providers::stripe::{StripeCheckoutSession, StripeSessionMetadata};

// ============ Signature helpers ============

fn current_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// 10 minutes ago - beyond the 5-minute tolerance.
fn old_timestamp() -> String {
    (chrono::Utc::now().timestamp() - 600).to_string()
}

fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn compute_replicate_signature(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Svix-style signature: base64 HMAC over "{id}.{timestamp}.{payload}".
fn compute_svix_signature(msg_id: &str, timestamp: &str, payload: &[u8], key: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    BASE64.encode(mac.finalize().into_bytes())
}

fn test_stripe_client() -> StripeClient {
    StripeClient::new(&StripeConfig {
        secret_key: "sk_test_xxx".to_string(),
        webhook_secret: "whsec_test_secret".to_string(),
    })
}

// ============ Stripe signature verification ============

#[test]
fn test_stripe_valid_signature() {
    let client = test_stripe_client();
    let payload = b"{\"type\":\"checkout.session.completed\"}";
    let timestamp = current_timestamp();
    let signature = compute_stripe_signature(payload, "whsec_test_secret", &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    assert!(client.verify_webhook_signature(payload, &header).unwrap());
}

#[test]
fn test_stripe_wrong_secret_rejected() {
    let client = test_stripe_client();
    let payload = b"{\"type\":\"checkout.session.completed\"}";
    let timestamp = current_timestamp();
    let signature = compute_stripe_signature(payload, "wrong_secret", &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    assert!(!client.verify_webhook_signature(payload, &header).unwrap());
}

#[test]
fn test_stripe_modified_payload_rejected() {
    let client = test_stripe_client();
    let original = b"{\"type\":\"checkout.session.completed\"}";
    let modified = b"{\"type\":\"checkout.session.completed\",\"hacked\":true}";
    let timestamp = current_timestamp();
    let signature = compute_stripe_signature(original, "whsec_test_secret", &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    assert!(!client.verify_webhook_signature(modified, &header).unwrap());
}

#[test]
fn test_stripe_old_timestamp_rejected() {
    let client = test_stripe_client();
    let payload = b"{}";
    let timestamp = old_timestamp();
    let signature = compute_stripe_signature(payload, "whsec_test_secret", &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    assert!(!client.verify_webhook_signature(payload, &header).unwrap());
}

#[test]
fn test_stripe_malformed_header_errors() {
    let client = test_stripe_client();
    assert!(client.verify_webhook_signature(b"{}", "garbage").is_err());
    assert!(client.verify_webhook_signature(b"{}", "t=123").is_err());
    assert!(client
        .verify_webhook_signature(b"{}", "v1=deadbeef")
        .is_err());
}

// ============ Replicate signature verification ============

#[test]
fn test_replicate_valid_signature() {
    let payload = b"{\"id\":\"pred_1\",\"status\":\"succeeded\"}";
    let signature = compute_replicate_signature(payload, "replicate_test_secret");

    assert!(
        replicate::verify_webhook_signature("replicate_test_secret", payload, &signature).unwrap()
    );
}

#[test]
fn test_replicate_wrong_secret_rejected() {
    let payload = b"{\"id\":\"pred_1\",\"status\":\"succeeded\"}";
    let signature = compute_replicate_signature(payload, "wrong_secret");

    assert!(
        !replicate::verify_webhook_signature("replicate_test_secret", payload, &signature).unwrap()
    );
}

#[test]
fn test_replicate_tampered_payload_rejected() {
    let payload = b"{\"id\":\"pred_1\",\"status\":\"succeeded\"}";
    let tampered = b"{\"id\":\"pred_2\",\"status\":\"succeeded\"}";
    let signature = compute_replicate_signature(payload, "replicate_test_secret");

    assert!(
        !replicate::verify_webhook_signature("replicate_test_secret", tampered, &signature)
            .unwrap()
    );
}

#[test]
fn test_replicate_garbage_signature_rejected() {
    assert!(
        !replicate::verify_webhook_signature("replicate_test_secret", b"{}", "not-hex").unwrap()
    );
}

// ============ Svix (identity provider) signature verification ============

const SVIX_SECRET: &str = "whsec_dGVzdHNlY3JldA=="; // base64("testsecret")
const SVIX_KEY: &[u8] = b"testsecret";

#[test]
fn test_svix_valid_signature() {
    let payload = b"{\"type\":\"user.created\"}";
    let timestamp = current_timestamp();
    let signature = compute_svix_signature("msg_1", &timestamp, payload, SVIX_KEY);
    let header = format!("v1,{}", signature);

    assert!(
        clerk::verify_webhook_signature(SVIX_SECRET, "msg_1", &timestamp, payload, &header)
            .unwrap()
    );
}

#[test]
fn test_svix_accepts_any_of_multiple_signatures() {
    let payload = b"{\"type\":\"user.created\"}";
    let timestamp = current_timestamp();
    let signature = compute_svix_signature("msg_1", &timestamp, payload, SVIX_KEY);
    let header = format!("v1,AAAAinvalid v1,{}", signature);

    assert!(
        clerk::verify_webhook_signature(SVIX_SECRET, "msg_1", &timestamp, payload, &header)
            .unwrap()
    );
}

#[test]
fn test_svix_wrong_key_rejected() {
    let payload = b"{\"type\":\"user.created\"}";
    let timestamp = current_timestamp();
    let signature = compute_svix_signature("msg_1", &timestamp, payload, b"wrongkey");
    let header = format!("v1,{}", signature);

    assert!(
        !clerk::verify_webhook_signature(SVIX_SECRET, "msg_1", &timestamp, payload, &header)
            .unwrap()
    );
}

#[test]
fn test_svix_stale_timestamp_rejected() {
    let payload = b"{\"type\":\"user.created\"}";
    let timestamp = old_timestamp();
    let signature = compute_svix_signature("msg_1", &timestamp, payload, SVIX_KEY);
    let header = format!("v1,{}", signature);

    assert!(
        !clerk::verify_webhook_signature(SVIX_SECRET, "msg_1", &timestamp, payload, &header)
            .unwrap()
    );
}

#[test]
fn test_svix_mismatched_msg_id_rejected() {
    let payload = b"{\"type\":\"user.created\"}";
    let timestamp = current_timestamp();
    let signature = compute_svix_signature("msg_1", &timestamp, payload, SVIX_KEY);
    let header = format!("v1,{}", signature);

    assert!(
        !clerk::verify_webhook_signature(SVIX_SECRET, "msg_other", &timestamp, payload, &header)
            .unwrap()
    );
}

// ============ Payment webhook processing ============

fn paid_session(user_id: &str, package_id: &str) -> StripeCheckoutSession {
    StripeCheckoutSession {
        id: "cs_test_1".to_string(),
        payment_status: "paid".to_string(),
        payment_intent: Some("pi_test_1".to_string()),
        metadata: StripeSessionMetadata {
            user_id: Some(user_id.to_string()),
            package_id: Some(package_id.to_string()),
        },
    }
}

#[test]
fn test_checkout_completed_credits_starter_package() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    let (status, _) =
        process_checkout_completed(&mut conn, "evt_1", &paid_session(&user.id, "starter"));
    assert_eq!(status, StatusCode::OK);

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 30);

    let purchases = transactions_of_kind(&conn, &user.id, TransactionKind::Purchase);
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].amount, 30);
    assert_eq!(purchases[0].external_ref.as_deref(), Some("pi_test_1"));
    assert!(purchases[0].metadata.as_ref().unwrap().contains("starter"));
}

#[test]
fn test_checkout_replay_credits_exactly_once() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);
    let session = paid_session(&user.id, "starter");

    let (first, _) = process_checkout_completed(&mut conn, "evt_1", &session);
    let (second, message) = process_checkout_completed(&mut conn, "evt_1", &session);

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(message, "Already processed");

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 30);
    assert_eq!(
        transactions_of_kind(&conn, &user.id, TransactionKind::Purchase).len(),
        1
    );
}

#[test]
fn test_checkout_distinct_events_both_credit() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    process_checkout_completed(&mut conn, "evt_1", &paid_session(&user.id, "starter"));
    process_checkout_completed(&mut conn, "evt_2", &paid_session(&user.id, "pro"));

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 130);
}

#[test]
fn test_checkout_zero_cost_session_credits() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    let session = StripeCheckoutSession {
        payment_status: "no_payment_required".to_string(),
        payment_intent: None,
        ..paid_session(&user.id, "starter")
    };
    let (status, _) = process_checkout_completed(&mut conn, "evt_1", &session);

    assert_eq!(status, StatusCode::OK);
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 30);

    // Without a payment intent, the session id is the external reference.
    let purchases = transactions_of_kind(&conn, &user.id, TransactionKind::Purchase);
    assert_eq!(purchases[0].external_ref.as_deref(), Some("cs_test_1"));
}

#[test]
fn test_checkout_unpaid_session_ignored() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    let session = StripeCheckoutSession {
        payment_status: "unpaid".to_string(),
        ..paid_session(&user.id, "starter")
    };
    let (status, _) = process_checkout_completed(&mut conn, "evt_1", &session);

    assert_eq!(status, StatusCode::OK);
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
    assert!(queries::list_transactions_for_user(&conn, &user.id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_checkout_missing_metadata_rejected_without_mutation() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    let session = StripeCheckoutSession {
        metadata: StripeSessionMetadata {
            user_id: None,
            package_id: Some("starter".to_string()),
        },
        ..paid_session(&user.id, "starter")
    };
    let (status, _) = process_checkout_completed(&mut conn, "evt_1", &session);

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
}

#[test]
fn test_checkout_unknown_package_rejected_without_mutation() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "user_pay", 0);

    let (status, message) =
        process_checkout_completed(&mut conn, "evt_1", &paid_session(&user.id, "mega"));

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message, "Unknown package");
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
}

#[tokio::test]
async fn test_stripe_handler_rejects_invalid_signature_without_mutation() {
    let ctx = TestContext::new();
    let user = {
        let conn = ctx.state.db.get().unwrap();
        create_test_user(&conn, "user_pay", 0)
    };

    let payload = serde_json::json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_test_1",
            "metadata": { "user_id": user.id, "package_id": "starter" }
        }}
    })
    .to_string();

    let timestamp = current_timestamp();
    let bad_signature = compute_stripe_signature(payload.as_bytes(), "wrong_secret", &timestamp);
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        HeaderValue::from_str(&format!("t={},v1={}", timestamp, bad_signature)).unwrap(),
    );

    let (status, _) =
        handle_stripe_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let conn = ctx.state.db.get().unwrap();
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
}

#[tokio::test]
async fn test_stripe_handler_credits_with_valid_signature() {
    let ctx = TestContext::new();
    let user = {
        let conn = ctx.state.db.get().unwrap();
        create_test_user(&conn, "user_pay", 0)
    };

    let payload = serde_json::json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_test_1",
            "metadata": { "user_id": user.id, "package_id": "starter" }
        }}
    })
    .to_string();

    let timestamp = current_timestamp();
    let signature =
        compute_stripe_signature(payload.as_bytes(), "whsec_test_secret", &timestamp);
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        HeaderValue::from_str(&format!("t={},v1={}", timestamp, signature)).unwrap(),
    );

    let (status, message) =
        handle_stripe_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message, "OK");

    let conn = ctx.state.db.get().unwrap();
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 30);
}

#[tokio::test]
async fn test_stripe_handler_ignores_other_event_types() {
    let ctx = TestContext::new();

    let payload = serde_json::json!({
        "id": "evt_1",
        "type": "invoice.paid",
        "data": { "object": {} }
    })
    .to_string();

    let timestamp = current_timestamp();
    let signature =
        compute_stripe_signature(payload.as_bytes(), "whsec_test_secret", &timestamp);
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        HeaderValue::from_str(&format!("t={},v1={}", timestamp, signature)).unwrap(),
    );

    let (status, message) =
        handle_stripe_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message, "Event ignored");
}

// ============ Inference webhook processing ============

/// Seed a user with a charged, parked generation awaiting its webhook.
fn seed_parked_generation(
    conn: &mut rusqlite::Connection,
    clerk_id: &str,
    cost: i64,
) -> (User, Generation) {
    let user = create_test_user(conn, clerk_id, cost);
    let generation_id = format!("mr_gen_{}", clerk_id);
    assert!(billing::charge_generation(conn, &user.id, cost, &generation_id).unwrap());
    let generation = queries::create_generation(
        conn,
        &generation_id,
        &CreateGeneration {
            user_id: user.id.clone(),
            source_image_path: Some(format!("rooms/{}/{}.png", user.id, generation_id)),
            cost,
        },
    )
    .unwrap();
    queries::set_generation_prediction(conn, &generation.id, "pred_test").unwrap();
    queries::update_generation_progress(conn, &generation.id, GenerationStatus::Processing)
        .unwrap();
    (user, generation)
}

fn update(status: GenerationStatus, urls: Vec<String>, error: Option<&str>) -> PredictionUpdate {
    PredictionUpdate {
        prediction_id: "pred_test".to_string(),
        status,
        output_urls: urls,
        error: error.map(|e| e.to_string()),
    }
}

#[test]
fn test_prediction_success_updates_generation() {
    let mut conn = setup_test_db();
    let (user, generation) = seed_parked_generation(&mut conn, "user_inf", 1);

    let outcome = apply_prediction_update(
        &mut conn,
        &update(
            GenerationStatus::Succeeded,
            vec!["https://cdn.test/a.png".to_string()],
            None,
        ),
    )
    .unwrap();
    assert!(matches!(
        outcome,
        ApplyOutcome::Succeeded {
            transitioned: true,
            ..
        }
    ));

    let generation = queries::get_generation_by_id(&conn, &generation.id)
        .unwrap()
        .unwrap();
    assert_eq!(generation.status, GenerationStatus::Succeeded);
    assert_eq!(generation.output_urls, vec!["https://cdn.test/a.png"]);
    assert!(generation.completed_at.is_some());

    // Success keeps the deduction: no refund row.
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
    assert!(transactions_of_kind(&conn, &user.id, TransactionKind::Refund).is_empty());
}

#[test]
fn test_prediction_failure_refunds_once_across_replays() {
    let mut conn = setup_test_db();
    let (user, _) = seed_parked_generation(&mut conn, "user_inf", 1);

    let failure = update(GenerationStatus::Failed, Vec::new(), Some("model crashed"));

    let first = apply_prediction_update(&mut conn, &failure).unwrap();
    let second = apply_prediction_update(&mut conn, &failure).unwrap();

    assert!(matches!(first, ApplyOutcome::Refunded { transitioned: true }));
    assert!(matches!(second, ApplyOutcome::AlreadyProcessed));

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 1);
    assert_eq!(
        transactions_of_kind(&conn, &user.id, TransactionKind::Refund).len(),
        1
    );
}

#[test]
fn test_prediction_success_replay_is_deduped() {
    let mut conn = setup_test_db();
    seed_parked_generation(&mut conn, "user_inf", 1);

    let success = update(
        GenerationStatus::Succeeded,
        vec!["https://cdn.test/a.png".to_string()],
        None,
    );

    apply_prediction_update(&mut conn, &success).unwrap();
    let replay = apply_prediction_update(&mut conn, &success).unwrap();
    assert!(matches!(replay, ApplyOutcome::AlreadyProcessed));
}

#[test]
fn test_prediction_succeeded_with_no_outputs_refunds() {
    let mut conn = setup_test_db();
    let (user, generation) = seed_parked_generation(&mut conn, "user_inf", 2);

    let outcome = apply_prediction_update(
        &mut conn,
        &update(GenerationStatus::Succeeded, Vec::new(), None),
    )
    .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Refunded { transitioned: true }));

    let generation = queries::get_generation_by_id(&conn, &generation.id)
        .unwrap()
        .unwrap();
    assert_eq!(generation.status, GenerationStatus::Failed);

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 2);
}

#[test]
fn test_prediction_canceled_refunds() {
    let mut conn = setup_test_db();
    let (user, generation) = seed_parked_generation(&mut conn, "user_inf", 1);

    let outcome = apply_prediction_update(
        &mut conn,
        &update(GenerationStatus::Canceled, Vec::new(), None),
    )
    .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Refunded { transitioned: true }));

    let generation = queries::get_generation_by_id(&conn, &generation.id)
        .unwrap()
        .unwrap();
    assert_eq!(generation.status, GenerationStatus::Canceled);

    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 1);
}

#[test]
fn test_prediction_unknown_id_is_reported() {
    let mut conn = setup_test_db();

    let result = apply_prediction_update(
        &mut conn,
        &update(GenerationStatus::Succeeded, Vec::new(), None),
    );

    let (status, _) = result.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replicate_handler_rejects_invalid_signature_without_mutation() {
    let ctx = TestContext::new();
    let (user, generation) = {
        let mut conn = ctx.state.db.get().unwrap();
        seed_parked_generation(&mut conn, "user_inf", 1)
    };

    let payload =
        serde_json::json!({ "id": "pred_test", "status": "failed", "error": "boom" }).to_string();
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-replicate-signature",
        HeaderValue::from_static("deadbeef"),
    );

    let (status, _) =
        handle_replicate_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let conn = ctx.state.db.get().unwrap();
    let generation = queries::get_generation_by_id(&conn, &generation.id)
        .unwrap()
        .unwrap();
    assert_eq!(generation.status, GenerationStatus::Processing);
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 0);
}

#[tokio::test]
async fn test_replicate_handler_processes_failure_with_valid_signature() {
    let ctx = TestContext::new();
    let (user, _) = {
        let mut conn = ctx.state.db.get().unwrap();
        seed_parked_generation(&mut conn, "user_inf", 1)
    };

    let payload =
        serde_json::json!({ "id": "pred_test", "status": "failed", "error": "boom" }).to_string();
    let signature = compute_replicate_signature(payload.as_bytes(), "replicate_test_secret");
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-replicate-signature",
        HeaderValue::from_str(&signature).unwrap(),
    );

    let (status, _) =
        handle_replicate_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::OK);

    let conn = ctx.state.db.get().unwrap();
    let user_after = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user_after.credits, 1);
    assert_eq!(
        transactions_of_kind(&conn, &user.id, TransactionKind::Refund).len(),
        1
    );
}

#[tokio::test]
async fn test_replicate_handler_unknown_prediction_is_404() {
    let ctx = TestContext::new();

    let payload =
        serde_json::json!({ "id": "pred_missing", "status": "succeeded" }).to_string();
    let signature = compute_replicate_signature(payload.as_bytes(), "replicate_test_secret");
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-replicate-signature",
        HeaderValue::from_str(&signature).unwrap(),
    );

    let (status, _) =
        handle_replicate_webhook(State(ctx.state.clone()), headers, Bytes::from(payload)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============ Identity webhook processing ============

#[test]
fn test_user_created_grants_bonus_once() {
    let mut conn = setup_test_db();

    let (first, _) = process_user_created(&mut conn, "user_clerk_9", "new@example.com", 3);
    let (second, message) = process_user_created(&mut conn, "user_clerk_9", "new@example.com", 3);

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(message, "User already exists");

    let user = queries::get_user_by_clerk_id(&conn, "user_clerk_9")
        .unwrap()
        .unwrap();
    assert_eq!(user.credits, 3);
    assert_eq!(user.email, "new@example.com");
    assert_eq!(
        transactions_of_kind(&conn, &user.id, TransactionKind::Bonus).len(),
        1
    );

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_clerk_handler_full_flow_with_valid_signature() {
    let ctx = TestContext::new();

    let payload = serde_json::json!({
        "type": "user.created",
        "data": {
            "id": "user_clerk_7",
            "email_addresses": [
                { "id": "idn_2", "email_address": "secondary@example.com" },
                { "id": "idn_1", "email_address": "primary@example.com" }
            ],
            "primary_email_address_id": "idn_1"
        }
    })
    .to_string();

    let timestamp = current_timestamp();
    let signature = compute_svix_signature("msg_7", &timestamp, payload.as_bytes(), SVIX_KEY);
    let mut headers = HeaderMap::new();
    headers.insert("svix-id", HeaderValue::from_static("msg_7"));
    headers.insert("svix-timestamp", HeaderValue::from_str(&timestamp).unwrap());
    headers.insert(
        "svix-signature",
        HeaderValue::from_str(&format!("v1,{}", signature)).unwrap(),
    );

    let (status, _) = magicroom::handlers::webhooks::handle_clerk_webhook(
        State(ctx.state.clone()),
        headers,
        Bytes::from(payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let conn = ctx.state.db.get().unwrap();
    let user = queries::get_user_by_clerk_id(&conn, "user_clerk_7")
        .unwrap()
        .unwrap();
    assert_eq!(user.email, "primary@example.com");
}

#[tokio::test]
async fn test_clerk_handler_rejects_invalid_signature_without_mutation() {
    let ctx = TestContext::new();

    let payload = serde_json::json!({
        "type": "user.created",
        "data": { "id": "user_clerk_8", "email_addresses": [] }
    })
    .to_string();

    let timestamp = current_timestamp();
    let signature =
        compute_svix_signature("msg_8", &timestamp, payload.as_bytes(), b"wrongkey");
    let mut headers = HeaderMap::new();
    headers.insert("svix-id", HeaderValue::from_static("msg_8"));
    headers.insert("svix-timestamp", HeaderValue::from_str(&timestamp).unwrap());
    headers.insert(
        "svix-signature",
        HeaderValue::from_str(&format!("v1,{}", signature)).unwrap(),
    );

    let (status, _) = magicroom::handlers::webhooks::handle_clerk_webhook(
        State(ctx.state.clone()),
        headers,
        Bytes::from(payload),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let conn = ctx.state.db.get().unwrap();
    assert!(queries::get_user_by_clerk_id(&conn, "user_clerk_8")
        .unwrap()
        .is_none());
}
