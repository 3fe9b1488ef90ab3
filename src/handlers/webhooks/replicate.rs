//! Inference-provider webhook: asynchronous completion notices for
//! generations the orchestrator parked as `processing`.
//!
//! The provider echoes its own prediction id, so lookups go through the
//! generation's stored `prediction_id`. The provider has no per-delivery
//! event id either; dedup keys on `{prediction_id}:{status}`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;
use serde::Deserialize;

use crate::billing::{self, SettleOutcome};
use crate::db::{queries, AppState};
use crate::handlers::api::spawn_source_cleanup;
use crate::models::{Generation, GenerationStatus};
use crate::providers::replicate::{map_status, normalize_output, verify_webhook_signature};

use super::common::{db_error, WebhookResult};

#[derive(Debug, Deserialize)]
pub struct PredictionWebhook {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Normalized prediction state carried into processing.
#[derive(Debug)]
pub struct PredictionUpdate {
    pub prediction_id: String,
    pub status: GenerationStatus,
    pub output_urls: Vec<String>,
    pub error: Option<String>,
}

impl From<&PredictionWebhook> for PredictionUpdate {
    fn from(payload: &PredictionWebhook) -> Self {
        Self {
            prediction_id: payload.id.clone(),
            status: map_status(&payload.status),
            output_urls: normalize_output(payload.output.as_ref()),
            error: payload.error.clone(),
        }
    }
}

/// Result of folding a webhook delivery into the database.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Dedup marker already present for this delivery.
    AlreadyProcessed,
    /// Non-terminal status recorded.
    Progress,
    /// Generation completed successfully. `transitioned` is false when
    /// another path (sync response, poll) got there first.
    Succeeded {
        generation: Generation,
        transitioned: bool,
    },
    /// Generation failed or was canceled; credits refunded if this call
    /// performed the transition.
    Refunded { transitioned: bool },
}

/// Apply a prediction update. All mutations for a delivery happen in one
/// database transaction together with the dedup claim, so replays are
/// no-ops and a failed mutation leaves the claim unset for retries.
pub fn apply_prediction_update(
    conn: &mut Connection,
    update: &PredictionUpdate,
) -> Result<ApplyOutcome, WebhookResult> {
    let generation = match queries::get_generation_by_prediction_id(conn, &update.prediction_id) {
        Ok(Some(g)) => g,
        Ok(None) => {
            tracing::error!(
                "Webhook for unknown prediction {} (status {})",
                update.prediction_id,
                update.status
            );
            return Err((StatusCode::NOT_FOUND, "Unknown prediction"));
        }
        Err(e) => {
            tracing::error!("DB error looking up prediction: {}", e);
            return Err(db_error());
        }
    };

    let event_id = format!("{}:{}", update.prediction_id, update.status);

    match update.status {
        GenerationStatus::Starting | GenerationStatus::Processing => {
            // Progress notices are idempotent; no dedup marker needed.
            if let Err(e) =
                queries::update_generation_progress(conn, &generation.id, update.status)
            {
                tracing::error!("Failed to update generation progress: {}", e);
                return Err(db_error());
            }
            Ok(ApplyOutcome::Progress)
        }
        GenerationStatus::Succeeded if !update.output_urls.is_empty() => {
            let tx = match conn.transaction() {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::error!("Failed to start transaction: {}", e);
                    return Err(db_error());
                }
            };

            match queries::try_record_webhook_event(&tx, "replicate", &event_id) {
                Ok(true) => {}
                Ok(false) => return Ok(ApplyOutcome::AlreadyProcessed),
                Err(e) => {
                    tracing::error!("Failed to record webhook event: {}", e);
                    return Err(db_error());
                }
            }

            let transitioned = match queries::try_complete_generation(
                &tx,
                &generation.id,
                GenerationStatus::Succeeded,
                &update.output_urls,
                None,
            ) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to complete generation: {}", e);
                    return Err(db_error());
                }
            };

            if let Err(e) = tx.commit() {
                tracing::error!("Failed to commit webhook transaction: {}", e);
                return Err(db_error());
            }

            Ok(ApplyOutcome::Succeeded {
                generation,
                transitioned,
            })
        }
        status => {
            // Failed, canceled, or "succeeded" with zero outputs - all
            // refund paths.
            let error_text = update
                .error
                .clone()
                .unwrap_or_else(|| "Inference provider returned no output images".to_string());
            let terminal = if status == GenerationStatus::Succeeded {
                GenerationStatus::Failed
            } else {
                status
            };

            match billing::settle_failed_generation(
                conn,
                &generation,
                terminal,
                Some(&error_text),
                Some(("replicate", &event_id)),
            ) {
                Ok(SettleOutcome::AlreadyProcessed) => Ok(ApplyOutcome::AlreadyProcessed),
                Ok(SettleOutcome::AlreadySettled) => {
                    Ok(ApplyOutcome::Refunded { transitioned: false })
                }
                Ok(SettleOutcome::Applied) => Ok(ApplyOutcome::Refunded { transitioned: true }),
                Err(e) => {
                    tracing::error!("Failed to settle failed generation: {}", e);
                    Err(db_error())
                }
            }
        }
    }
}

/// Axum handler for inference-provider webhooks.
pub async fn handle_replicate_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(signature) = headers
        .get("x-replicate-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "Missing signature");
    };

    match verify_webhook_signature(&state.replicate_webhook_secret, &body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => {
            tracing::error!("Inference webhook signature verification error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signature verification failed");
        }
    }

    let payload: PredictionWebhook = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Failed to parse inference webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };
    let update = PredictionUpdate::from(&payload);

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return db_error();
        }
    };

    match apply_prediction_update(&mut conn, &update) {
        Ok(ApplyOutcome::AlreadyProcessed) => (StatusCode::OK, "Already processed"),
        Ok(ApplyOutcome::Progress) => (StatusCode::OK, "OK"),
        Ok(ApplyOutcome::Succeeded {
            generation,
            transitioned,
        }) => {
            if transitioned {
                // The generation is done; the source photo can go.
                spawn_source_cleanup(
                    state.storage.clone(),
                    state.upload_bucket.clone(),
                    generation.source_image_path.clone(),
                );
                tracing::info!(
                    "Generation {} completed via webhook ({} output(s))",
                    generation.id,
                    generation.output_urls.len().max(update.output_urls.len())
                );
            }
            (StatusCode::OK, "OK")
        }
        Ok(ApplyOutcome::Refunded { .. }) => (StatusCode::OK, "OK"),
        Err(result) => result,
    }
}
