//! HTTP API handlers for kproc-server

pub mod download;
pub mod health;
pub mod process;
pub mod songs;
pub mod upload;
pub mod ws;

pub use download::download_routes;
pub use health::health_routes;
pub use process::process_routes;
pub use songs::songs_routes;
pub use upload::upload_routes;
pub use ws::ws_routes;

use crate::error::ApiError;
use axum::http::HeaderMap;
use kproc_common::FileId;

/// Parse a `file_id` path segment; unknown shapes read as unknown files
pub(crate) fn parse_file_id(raw: &str) -> Result<FileId, ApiError> {
    FileId::parse(raw).ok_or_else(|| ApiError::NotFound(format!("Unknown file_id: {}", raw)))
}

/// Absolute base URL for links in response bodies, derived from the
/// request's Host header (scheme from X-Forwarded-Proto when present)
pub(crate) fn base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

/// Content type for a served artifact, by extension
pub(crate) fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "lrc" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
