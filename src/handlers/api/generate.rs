use std::sync::Arc;

use axum::extract::State;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::billing;
use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{AuthUser, Json, Path};
use crate::id::EntityType;
use crate::models::{
    CreateGeneration, Generation, GenerationStatus, Quality, RoomType, StyleTheme,
};
use crate::prompt;
use crate::providers::{InferenceRequest, ObjectStorage, Prediction};

/// Raw source images are capped at 10 MiB.
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Source room photo, base64-encoded (optionally a data URL).
    pub base64_image: String,
    pub room_type: RoomType,
    pub theme: StyleTheme,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    /// The generation id; also the handle for `GET /api/generate/{id}`.
    pub prediction_id: String,
    /// Empty while the provider is still working; the status endpoint or
    /// the completion webhook fills it in.
    pub output_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatusResponse {
    pub id: String,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ImagePayload {
    bytes: Vec<u8>,
    content_type: String,
    extension: &'static str,
}

fn decode_base64_image(raw: &str) -> Result<ImagePayload> {
    // Accept both bare base64 and data URLs ("data:image/png;base64,....").
    let (content_type, data) = match raw.split_once(";base64,") {
        Some((prefix, rest)) => {
            let ct = prefix.strip_prefix("data:").unwrap_or(prefix);
            (ct.to_string(), rest)
        }
        None => ("image/png".to_string(), raw),
    };

    let bytes = BASE64
        .decode(data.trim())
        .map_err(|_| AppError::BadRequest(msg::INVALID_IMAGE_ENCODING.into()))?;

    if bytes.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_IMAGE.into()));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::BadRequest(format!(
            "Image exceeds the {} MiB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }

    let extension = match content_type.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };

    Ok(ImagePayload {
        bytes,
        content_type,
        extension,
    })
}

/// Settle a generation that failed after its credits were deducted, then
/// build the user-facing error carrying the provider's message.
fn fail_and_refund(
    conn: &mut Connection,
    generation: &Generation,
    error_text: &str,
) -> Result<AppError> {
    billing::settle_failed_generation(
        conn,
        generation,
        GenerationStatus::Failed,
        Some(error_text),
        None,
    )?;
    Ok(AppError::GenerationFailed(format!(
        "{}. {}.",
        error_text,
        msg::CREDIT_REFUNDED
    )))
}

/// Best-effort removal of the uploaded source photo after a successful
/// generation. Failure is logged and never fails the parent operation.
pub async fn cleanup_source_image(storage: &dyn ObjectStorage, bucket: &str, path: &str) {
    if let Err(e) = storage.delete(bucket, path).await {
        tracing::warn!("Failed to delete source image {}/{}: {}", bucket, path, e);
    }
}

pub fn spawn_source_cleanup(
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    path: Option<String>,
) {
    let Some(path) = path else { return };
    tokio::spawn(async move {
        cleanup_source_image(storage.as_ref(), &bucket, &path).await;
    });
}

/// `POST /api/generate` - the generation orchestrator.
///
/// Order of operations matters: validate, balance gate, rate limit, deduct,
/// record usage, upload, invoke the provider. Credits are at risk between
/// the deduction and the provider's answer; every failure path past the
/// deduction refunds before surfacing the error.
pub async fn create_generation(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    // Validate the payload before touching any state.
    let image = decode_base64_image(&request.base64_image)?;
    let cost = request.quality.credit_cost();

    let mut conn = state.db.get()?;
    let user = super::resolve_user(&state, &mut conn, &identity)?;

    // Balance gate; no side effects have happened yet.
    if user.credits < cost {
        return Err(AppError::InsufficientCredits);
    }

    let decision = state.rate_limiter.check(&conn, &user.id);
    if !decision.allowed {
        let reset_at = decision
            .reset_at
            .unwrap_or_else(|| Utc::now().timestamp() + state.rate_limiter.window_secs());
        return Err(AppError::RateLimited { reset_at });
    }

    // Deduct before the external call. The conditional decrement also
    // closes the race where concurrent requests all passed the balance
    // gate above against the same not-yet-decremented balance.
    let generation_id = EntityType::Generation.gen_id();
    if !billing::charge_generation(&mut conn, &user.id, cost, &generation_id)? {
        return Err(AppError::InsufficientCredits);
    }

    let source_path = format!("rooms/{}/{}.{}", user.id, generation_id, image.extension);
    let generation = queries::create_generation(
        &conn,
        &generation_id,
        &CreateGeneration {
            user_id: user.id.clone(),
            source_image_path: Some(source_path.clone()),
            cost,
        },
    )?;

    // The provider fetches the source photo by URL, so it goes to storage
    // first. From here on failures are compensated with a refund.
    let image_url = match state
        .storage
        .upload(
            &state.upload_bucket,
            &source_path,
            &image.content_type,
            image.bytes,
        )
        .await
    {
        Ok(url) => url,
        Err(e) => return Err(fail_and_refund(&mut conn, &generation, &e.to_string())?),
    };

    let prompt = prompt::build_prompt(
        request.room_type,
        request.theme,
        request.quality,
        request.custom_prompt.as_deref(),
    );

    let inference_request = InferenceRequest {
        image_url,
        prompt,
        webhook_url: Some(format!("{}/api/webhooks/replicate", state.base_url)),
    };

    let prediction = match state.inference.generate(&inference_request).await {
        Ok(p) => p,
        Err(e) => return Err(fail_and_refund(&mut conn, &generation, &e.to_string())?),
    };

    queries::set_generation_prediction(&conn, &generation.id, &prediction.id)?;

    match prediction.status {
        GenerationStatus::Succeeded if !prediction.output_urls.is_empty() => {
            queries::try_complete_generation(
                &conn,
                &generation.id,
                GenerationStatus::Succeeded,
                &prediction.output_urls,
                None,
            )?;
            spawn_source_cleanup(
                state.storage.clone(),
                state.upload_bucket.clone(),
                generation.source_image_path.clone(),
            );
            tracing::info!(
                "Generation {} succeeded for {} ({} output(s))",
                generation.id,
                user.id,
                prediction.output_urls.len()
            );
            Ok(Json(GenerateResponse {
                success: true,
                prediction_id: generation.id,
                output_urls: prediction.output_urls,
            }))
        }
        GenerationStatus::Starting | GenerationStatus::Processing => {
            // Provider accepted the job but has not finished; the webhook
            // or the status endpoint completes it.
            queries::update_generation_progress(
                &conn,
                &generation.id,
                GenerationStatus::Processing,
            )?;
            Ok(Json(GenerateResponse {
                success: true,
                prediction_id: generation.id,
                output_urls: Vec::new(),
            }))
        }
        _ => {
            let error_text = prediction
                .error
                .clone()
                .unwrap_or_else(|| "Inference provider returned no output images".to_string());
            Err(fail_and_refund(&mut conn, &generation, &error_text)?)
        }
    }
}

/// `GET /api/generate/{id}` - generation status, owner-scoped.
///
/// Non-terminal records are refreshed by polling the provider directly;
/// the completion webhook may be delayed or lost.
pub async fn get_generation(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<GenerationStatusResponse>> {
    let mut conn = state.db.get()?;
    let user = super::resolve_user(&state, &mut conn, &identity)?;

    let mut generation = queries::get_generation_for_user(&conn, &id, &user.id)?
        .or_not_found(msg::GENERATION_NOT_FOUND)?;

    if !generation.status.is_terminal() {
        if let Some(prediction_id) = generation.prediction_id.clone() {
            match state.inference.get_prediction(&prediction_id).await {
                Ok(prediction) => {
                    apply_polled_prediction(&state, &mut conn, &generation, &prediction)?;
                    generation = queries::get_generation_for_user(&conn, &id, &user.id)?
                        .or_not_found(msg::GENERATION_NOT_FOUND)?;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to poll prediction {}: {} (serving stored status)",
                        prediction_id,
                        e
                    );
                }
            }
        }
    }

    Ok(Json(GenerationStatusResponse {
        id: generation.id,
        status: generation.status,
        output_urls: if generation.output_urls.is_empty() {
            None
        } else {
            Some(generation.output_urls)
        },
        error: generation.error,
    }))
}

/// Fold a polled provider snapshot into the stored generation. Shares the
/// exactly-once terminal transition with the webhook path, so a webhook
/// and a poll racing each other settle (and refund) a single time.
fn apply_polled_prediction(
    state: &AppState,
    conn: &mut Connection,
    generation: &Generation,
    prediction: &Prediction,
) -> Result<()> {
    match prediction.status {
        GenerationStatus::Succeeded if !prediction.output_urls.is_empty() => {
            if queries::try_complete_generation(
                conn,
                &generation.id,
                GenerationStatus::Succeeded,
                &prediction.output_urls,
                None,
            )? {
                spawn_source_cleanup(
                    state.storage.clone(),
                    state.upload_bucket.clone(),
                    generation.source_image_path.clone(),
                );
            }
        }
        GenerationStatus::Starting | GenerationStatus::Processing => {
            queries::update_generation_progress(conn, &generation.id, GenerationStatus::Processing)?;
        }
        status => {
            // Failed, canceled, or "succeeded" with nothing to show.
            let error_text = prediction
                .error
                .clone()
                .unwrap_or_else(|| "Inference provider returned no output images".to_string());
            let terminal = if status == GenerationStatus::Succeeded {
                GenerationStatus::Failed
            } else {
                status
            };
            billing::settle_failed_generation(
                conn,
                generation,
                terminal,
                Some(&error_text),
                None,
            )?;
        }
    }
    Ok(())
}
