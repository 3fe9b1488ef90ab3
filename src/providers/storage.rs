use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};

use super::ObjectStorage;

/// Client for a Supabase-compatible object storage REST API.
///
/// Uploads go through `POST {base}/object/{bucket}/{path}` with a service
/// key; public URLs are served from `{base}/object/public/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl StorageClient {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/object/{}/{}", self.base_url, bucket, path))
            .bearer_auth(&self.service_key)
            .header("Content-Type", content_type)
            // Retried orchestrator calls may hit the same path; overwrite.
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Storage upload failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Storage upload failed: {}",
                error_text
            )));
        }

        Ok(self.public_url(bucket, path))
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/object/{}/{}", self.base_url, bucket, path))
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Storage delete failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Storage delete failed: {}",
                error_text
            )));
        }

        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, bucket, path)
    }
}
