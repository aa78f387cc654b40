//! Upload endpoint
//!
//! Accepts a multipart form with a `file` field plus optional `title`,
//! `artist`, `auto_process`, and `model` fields. Duplicates answer 409
//! with the existing file's id; successful uploads return before the
//! auto-process chain finishes - progress is observable over the WebSocket
//! and `/status/<file_id>`.

use crate::context::RequestId;
use crate::error::{ApiError, ApiResult};
use crate::pipeline;
use crate::upload::{UploadError, UploadRequest};
use crate::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, Instrument};

pub async fn upload(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title = None;
    let mut artist = None;
    let mut auto_process = true;
    let mut chain_override: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest("File field is missing a filename".to_string())
                    })?;
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read file field: {}", e))
                })?;
                file = Some((filename, bytes.to_vec()));
            }
            "title" => title = field.text().await.ok().filter(|t| !t.trim().is_empty()),
            "artist" => artist = field.text().await.ok().filter(|a| !a.trim().is_empty()),
            "auto_process" => {
                if let Ok(raw) = field.text().await {
                    auto_process = parse_bool(&raw).unwrap_or(true);
                }
            }
            "model" => chain_override = field.text().await.ok().filter(|m| !m.trim().is_empty()),
            _ => {
                // Unknown fields are ignored.
            }
        }
    }

    let (original_filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing file field".to_string()))?;

    let record = match state
        .uploader
        .ingest(UploadRequest {
            original_filename,
            bytes,
            title,
            artist,
        })
        .await
    {
        Ok(record) => record,
        Err(UploadError::Duplicate { file_id }) => {
            // The duplicate body has its own shape; request_id rides along
            // like every other error body.
            let body = json!({
                "error": "Song already exists",
                "file_id": file_id,
                "existing": true,
                "message": format!("A song with this filename already exists as {}", file_id),
                "request_id": request_id,
            });
            return Ok((StatusCode::CONFLICT, Json(body)).into_response());
        }
        Err(UploadError::UnsupportedExtension(name)) => {
            return Err(ApiError::UnsupportedMedia(format!(
                "File type not allowed: {}",
                name
            )));
        }
        Err(UploadError::TooLarge { size, max }) => {
            return Err(ApiError::PayloadTooLarge(format!(
                "File is {} bytes; limit is {}",
                size, max
            )));
        }
        Err(UploadError::Common(e)) => return Err(e.into()),
    };

    if auto_process {
        let chain = match chain_override {
            Some(model) => vec![model],
            None => state.config.auto_process_chain.clone(),
        };
        let runner = Arc::clone(&state.runner);
        let registry = Arc::clone(&state.registry);
        let file_id = record.file_id;
        let chain_request_id = request_id.clone();
        let span = tracing::info_span!("auto_chain", file_id = %file_id, request_id = %request_id);
        tokio::spawn(
            async move {
                pipeline::run_chain(runner, registry, &chain, file_id, &chain_request_id).await;
            }
            .instrument(span),
        );
        info!(file_id = %record.file_id, "Auto-process chain scheduled");
    }

    let body = json!({
        "file_id": record.file_id,
        "filename": record.sanitized_filename,
        "original_filename": record.original_filename,
        "title": record.title,
        "artist": record.artist,
        "size": record.size_bytes,
        "extension": record.extension,
        "duration_seconds": record.duration_seconds,
        "status": "completed",
        "auto_process": auto_process,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn upload_routes(config: &crate::config::Config) -> Router<AppState> {
    // Generous headroom over the file limit for multipart framing; the
    // pipeline enforces the exact per-file limit.
    let body_limit = (config.max_upload_bytes as usize).saturating_add(1024 * 1024);
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(body_limit))
}
