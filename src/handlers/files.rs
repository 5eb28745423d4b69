use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::crud;
use crate::error::ApiError;
use crate::generation::attachments::DOCX_MIME;
use crate::models::{NewAttachment, ProcessingMethod};
use crate::state::AppState;

const ALLOWED_TYPES: &[&str] = &[
    "text/plain",
    DOCX_MIME,
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/webp",
];

/// Multipart parsing headroom on top of the raw file bytes.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Body limit for the upload route. Axum's default 2 MB cap would reject
/// large uploads before the handler's own size check ever runs.
pub fn upload_body_limit(max_file_size: usize) -> DefaultBodyLimit {
    DefaultBodyLimit::max(max_file_size + MULTIPART_OVERHEAD)
}

#[derive(Debug, Serialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub processing_method: String,
}

fn metadata(attachment: crate::models::Attachment) -> FileMetadata {
    FileMetadata {
        file_id: attachment.id,
        filename: attachment.original_filename,
        content_type: attachment.content_type,
        size_bytes: attachment.size_bytes,
        processing_method: attachment.processing_method,
    }
}

/// Accepts one multipart `file` field, stores it locally, classifies it
/// for inline or remote-store delivery and registers the attachment row.
/// Remote-store uploads are attempted eagerly but a failure only defers
/// them to first use.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileMetadata>), ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;

    if field.name() != Some("file") {
        return Err(ApiError::BadRequest(
            "expected a single field named \"file\"".to_string(),
        ));
    }

    let filename = sanitize_filename(field.file_name().unwrap_or("upload"));
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    if !ALLOWED_TYPES.contains(&content_type.as_str()) {
        return Err(ApiError::Validation(format!(
            "unsupported content type {content_type:?}"
        )));
    }

    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;

    if data.is_empty() {
        return Err(ApiError::Validation("uploaded file is empty".to_string()));
    }
    if data.len() > state.settings.max_file_size {
        return Err(ApiError::Validation(format!(
            "file exceeds the {} byte limit",
            state.settings.max_file_size
        )));
    }

    let method = classify(&content_type, data.len(), state.settings.inline_size_limit);
    let file_id = Uuid::new_v4().to_string();

    tokio::fs::create_dir_all(&state.settings.upload_dir)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create upload dir: {e}"))?;
    let local_path = format!("{}/{file_id}_{filename}", state.settings.upload_dir);
    tokio::fs::write(&local_path, &data)
        .await
        .map_err(|e| anyhow::anyhow!("failed to store upload: {e}"))?;

    let attachment = crud::attachments::create_attachment(
        &state.pool,
        NewAttachment {
            id: file_id.clone(),
            original_filename: filename.clone(),
            content_type: content_type.clone(),
            size_bytes: data.len() as i64,
            local_path: local_path.clone(),
            processing_method: method.as_str().to_string(),
        },
    )
    .await?;
    info!(
        "stored upload {file_id} ({filename}, {} bytes, {})",
        data.len(),
        method.as_str()
    );

    if method == ProcessingMethod::Remote {
        match state
            .model
            .upload_file(std::path::Path::new(&local_path), &filename, &content_type)
            .await
        {
            Ok(remote_id) => {
                crud::attachments::update_remote_info(&state.pool, &file_id, &remote_id).await?;
            }
            Err(e) => {
                // First use of the attachment retries the upload.
                warn!("eager remote upload of {file_id} failed: {e}");
            }
        }
    }

    Ok((StatusCode::CREATED, Json(metadata(attachment))))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileMetadata>, ApiError> {
    let attachment = crud::attachments::get_attachment(&state.pool, &file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))?;
    Ok(Json(metadata(attachment)))
}

/// Text formats are always embedded in the prompt; binary formats go
/// inline only while small, otherwise through the provider's file store.
fn classify(content_type: &str, size: usize, inline_limit: usize) -> ProcessingMethod {
    if content_type == "text/plain" || content_type == DOCX_MIME {
        ProcessingMethod::Inline
    } else if size <= inline_limit {
        ProcessingMethod::Inline
    } else {
        ProcessingMethod::Remote
    }
}

/// Strips path separators and control characters from a client-supplied
/// filename.
fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
