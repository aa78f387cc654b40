//! Artifact download endpoints
//!
//! File bodies stream straight off disk; nothing is buffered in memory.
//! `/download/<file_id>` serves the original upload, the two-segment form
//! serves stage artifacts, and `/karaoke/...` serves the karaoke subtree.

use super::{content_type_for, parse_file_id};
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use kproc_common::StageKind;
use tokio_util::io::ReaderStream;

/// Stream one file off disk with its content type
async fn stream_file(path: std::path::PathBuf, name: &str) -> ApiResult<Response> {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::Storage(format!("{}: {}", path.display(), e)))?;
    let len = file
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(|e| ApiError::Storage(format!("{}: {}", path.display(), e)))?;

    let stream = ReaderStream::new(file);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(name))
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

/// GET /download/:file_id - the original upload
pub async fn download_original(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let path = state
        .store
        .find_upload(file_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Unknown file_id: {}", file_id)))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio")
        .to_string();
    stream_file(path, &name).await
}

/// GET /download/:file_id/:filename - a stage-output artifact
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((file_id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let path = state
        .store
        .resolve_output_file(file_id, &filename)
        .map_err(|_| ApiError::NotFound(format!("No such artifact: {}", filename)))?
        .ok_or_else(|| ApiError::NotFound(format!("No such artifact: {}", filename)))?;
    stream_file(path, &filename).await
}

/// GET /karaoke/:file_id/:filename - a karaoke-stage file
pub async fn download_karaoke(
    State(state): State<AppState>,
    Path((file_id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let path = state
        .store
        .resolve_artifact(file_id, StageKind::Karaoke, &filename)
        .map_err(|_| ApiError::NotFound(format!("No such artifact: {}", filename)))?
        .ok_or_else(|| ApiError::NotFound(format!("No such artifact: {}", filename)))?;
    stream_file(path, &filename).await
}

pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route("/download/:file_id", get(download_original))
        .route("/download/:file_id/:filename", get(download_artifact))
        .route("/karaoke/:file_id/:filename", get(download_karaoke))
}
