//! Song listing and deletion endpoints
//!
//! Every URL in a response body is absolute, derived from the request's
//! Host header, so browser clients on another origin can load media
//! directly.

use super::{base_url, parse_file_id};
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get};
use axum::{Json, Router};
use kproc_common::{StageKind, UploadRecord};
use serde_json::json;
use tracing::info;

fn song_entry(record: &UploadRecord, base: &str) -> serde_json::Value {
    json!({
        "id": record.file_id,
        "file_id": record.file_id,
        "filename": record.sanitized_filename,
        "title": record.title,
        "artist": record.artist,
        "size": record.size_bytes,
        "extension": record.extension,
        "upload_time": record.upload_time,
        "duration_seconds": record.duration_seconds,
        "url": format!("{}/download/{}", base, record.file_id),
    })
}

/// GET /songs - every persisted upload
pub async fn list_songs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let base = base_url(&headers);
    let songs: Vec<serde_json::Value> = state
        .store
        .iter_all_uploads()?
        .iter()
        .map(|record| song_entry(record, &base))
        .collect();
    Ok(Json(json!({ "songs": songs, "count": songs.len() })))
}

/// GET /karaoke/songs - uploads whose karaoke stage has completed
pub async fn list_karaoke_songs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let base = base_url(&headers);
    let mut songs = Vec::new();

    for record in state.store.iter_all_uploads()? {
        if !state.store.stage_complete(record.file_id, StageKind::Karaoke) {
            continue;
        }
        let files = state
            .store
            .list_stage_files(record.file_id, StageKind::Karaoke)?;
        let mut entry = song_entry(&record, &base);
        let karaoke_base = format!("{}/karaoke/{}", base, record.file_id);
        if let Some(lrc) = files.iter().find(|f| f.ends_with(".lrc")) {
            entry["lrc_url"] = json!(format!("{}/{}", karaoke_base, lrc));
        }
        if let Some(info) = files.iter().find(|f| f.ends_with(".json")) {
            entry["info_url"] = json!(format!("{}/{}", karaoke_base, info));
        }
        if let Some(instrumental) = files.iter().find(|f| f.starts_with("no_vocals.")) {
            entry["instrumental_url"] = json!(format!("{}/{}", karaoke_base, instrumental));
        }
        entry["karaoke_files"] = json!(files);
        songs.push(entry);
    }

    Ok(Json(json!({ "songs": songs, "count": songs.len() })))
}

/// DELETE /songs/:file_id - remove every artifact for a file
pub async fn delete_song(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file_id = parse_file_id(&file_id)?;

    let known = state.store.read_metadata(file_id)?.is_some()
        || state.store.find_upload(file_id)?.is_some()
        || StageKind::ALL
            .iter()
            .any(|s| state.store.stage_complete(file_id, *s));
    if !known {
        return Err(ApiError::NotFound(format!("Unknown file_id: {}", file_id)));
    }

    let report = state.store.delete_file(file_id);
    state.jobs.remove_file(file_id);
    info!(
        file_id = %file_id,
        deleted = report.deleted.len(),
        warnings = report.warnings.len(),
        "Song deleted"
    );

    Ok(Json(json!({
        "file_id": file_id,
        "deleted": report.deleted,
        "warnings": report.warnings,
    })))
}

pub fn songs_routes() -> Router<AppState> {
    Router::new()
        .route("/songs", get(list_songs))
        .route("/karaoke/songs", get(list_karaoke_songs))
        .route("/songs/:file_id", delete(delete_song))
}
