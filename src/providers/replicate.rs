use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};
use crate::models::GenerationStatus;

use super::{InferenceProvider, InferenceRequest, Prediction};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.replicate.com";

/// How long a single create call asks the provider to block for a result
/// before falling back to polling.
const SYNC_WAIT_SECS: u32 = 60;

/// Polling cadence and budget for predictions the provider did not finish
/// within the synchronous wait. After the budget runs out the prediction is
/// returned as-is (non-terminal) and the webhook or the status endpoint
/// finishes the job.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 30;

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    client: Client,
    api_base: String,
    api_token: String,
    model_version: String,
}

#[derive(Debug, Serialize)]
struct CreatePredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_events_filter: Option<&'a [&'a str]>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    image: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ReplicateClient {
    pub fn new(api_token: &str, model_version: &str) -> Self {
        Self::with_api_base(api_token, model_version, DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_token: &str, model_version: &str, api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            model_version: model_version.to_string(),
        }
    }

    async fn fetch_prediction(&self, id: &str) -> Result<PredictionResponse> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.api_base, id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Replicate API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Replicate API error: {}",
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Replicate response: {}", e)))
    }
}

#[async_trait]
impl InferenceProvider for ReplicateClient {
    async fn generate(&self, request: &InferenceRequest) -> Result<Prediction> {
        let webhook_events: &[&str] = &["completed"];
        let body = CreatePredictionRequest {
            version: &self.model_version,
            input: PredictionInput {
                image: &request.image_url,
                prompt: &request.prompt,
            },
            webhook: request.webhook_url.as_deref(),
            webhook_events_filter: request.webhook_url.as_ref().map(|_| webhook_events),
        };

        let response = self
            .client
            .post(format!("{}/v1/predictions", self.api_base))
            .bearer_auth(&self.api_token)
            .header("Prefer", format!("wait={}", SYNC_WAIT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Replicate API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Replicate API error: {}",
                error_text
            )));
        }

        let mut prediction: PredictionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Replicate response: {}", e)))?;

        // Without a webhook there is nobody to finish the job later, so
        // poll until terminal (bounded).
        if request.webhook_url.is_none() {
            let mut polls = 0;
            while !map_status(&prediction.status).is_terminal() && polls < MAX_POLLS {
                tokio::time::sleep(POLL_INTERVAL).await;
                prediction = self.fetch_prediction(&prediction.id).await?;
                polls += 1;
            }
        }

        Ok(into_prediction(prediction))
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction> {
        let prediction = self.fetch_prediction(id).await?;
        Ok(into_prediction(prediction))
    }
}

fn into_prediction(response: PredictionResponse) -> Prediction {
    let status = map_status(&response.status);
    Prediction {
        id: response.id,
        status,
        output_urls: normalize_output(response.output.as_ref()),
        error: response.error,
    }
}

/// Map the provider's status string onto our lifecycle enum. Unknown
/// strings are treated as still-processing rather than dropped.
pub fn map_status(raw: &str) -> GenerationStatus {
    GenerationStatus::from_str(raw).unwrap_or_else(|| {
        tracing::warn!("Unknown prediction status from provider: {}", raw);
        GenerationStatus::Processing
    })
}

/// The provider returns output as either a single URL string or an array
/// of URL strings depending on the model. Normalize to a list.
pub fn normalize_output(output: Option<&serde_json::Value>) -> Vec<String> {
    match output {
        Some(serde_json::Value::String(url)) => vec![url.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Verify the inference provider's webhook signature: an HMAC-SHA256 hex
/// digest over the raw request body, compared in constant time.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_output_string() {
        let value = serde_json::json!("https://example.com/out.png");
        assert_eq!(
            normalize_output(Some(&value)),
            vec!["https://example.com/out.png".to_string()]
        );
    }

    #[test]
    fn test_normalize_output_array() {
        let value = serde_json::json!(["https://a.png", "https://b.png"]);
        assert_eq!(normalize_output(Some(&value)).len(), 2);
    }

    #[test]
    fn test_normalize_output_missing_or_null() {
        assert!(normalize_output(None).is_empty());
        let value = serde_json::Value::Null;
        assert!(normalize_output(Some(&value)).is_empty());
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status("succeeded"), GenerationStatus::Succeeded);
        assert_eq!(map_status("failed"), GenerationStatus::Failed);
        assert_eq!(map_status("something_new"), GenerationStatus::Processing);
    }
}
