use axum::extract::{Multipart, State};
use serde::Serialize;
use uuid::Uuid;

use crate::db::AppState;
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;

/// Raw uploads are capped at 10 MiB.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub path: String,
}

/// Keep only filesystem-safe filename characters.
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// `POST /api/upload` - proxy a multipart file upload into object storage.
///
/// Expects a `file` part and an optional `bucket` part. Storage failures
/// surface with the provider's error text.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file: Option<(Vec<u8>, String, String)> = None;
    let mut bucket = state.upload_bucket.clone();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "upload.png".to_string());
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(AppError::BadRequest(format!(
                        "File exceeds the {} MiB limit",
                        MAX_UPLOAD_BYTES / (1024 * 1024)
                    )));
                }
                file = Some((bytes.to_vec(), content_type, filename));
            }
            Some("bucket") => {
                bucket = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid bucket field: {}", e)))?;
            }
            _ => {}
        }
    }

    let (bytes, content_type, filename) = file.ok_or_else(|| {
        AppError::BadRequest(msg::MISSING_FILE.to_string())
    })?;

    if bytes.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_IMAGE.to_string()));
    }

    let path = format!("uploads/{}/{}", Uuid::new_v4().as_simple(), filename);
    let url = state
        .storage
        .upload(&bucket, &path, &content_type, bytes)
        .await?;

    Ok(Json(UploadResponse { url, path }))
}
