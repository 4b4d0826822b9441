//! Multipart upload endpoint for job input files.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::api::ApiError;
use crate::app::App;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub path: String,
    pub size: usize,
}

/// Accept one `file` part and place it under the upload directory.
/// The returned `path` is the canonical form jobs reference in their
/// `data_source.location`.
pub async fn upload_file(
    State(app): State<App>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart request: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field
            .file_name()
            .map(ToString::to_string)
            .ok_or_else(|| ApiError::Validation("uploaded file has no filename".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
        if data.is_empty() {
            return Err(ApiError::Validation("uploaded file is empty".to_string()));
        }

        let filename = sanitize_filename(&original);
        fs::create_dir_all(&app.config.upload_dir)
            .await
            .map_err(|e| ApiError::Storage(StoreError::Io(e)))?;
        let target = app.config.upload_dir.join(&filename);
        fs::write(&target, &data)
            .await
            .map_err(|e| ApiError::Storage(StoreError::Io(e)))?;

        info!(file = %filename, size = data.len(), "stored uploaded file");
        return Ok(Json(UploadResponse {
            path: format!("/data/uploads/{filename}"),
            size: data.len(),
            filename,
        }));
    }

    Err(ApiError::Validation(
        "multipart body must include a 'file' field".to_string(),
    ))
}

/// Keep the name flat and shell-safe; anything unexpected becomes an
/// underscore.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
