//! Stage-trigger and per-file status endpoints

use super::parse_file_id;
use crate::context::RequestId;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::StageRequest;
use crate::processors::Params;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use kproc_common::{Job, StageKind, StageOutput};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// POST /process/:model/:file_id request body
#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    /// Model flavor; the processor's default when absent
    pub variant: Option<String>,
    /// Stage-specific parameters (task, prompt, duration_seconds, ...)
    #[serde(default)]
    pub params: Params,
}

/// POST /process/:model/:file_id response
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    #[serde(flatten)]
    pub output: StageOutput,
    pub skipped: bool,
    /// First cached artifact that satisfied the skip check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_output: Option<String>,
}

/// POST /process/:model/:file_id
///
/// Runs one stage synchronously and returns its output, or the cached
/// output with `skipped: true` when the markers already exist.
pub async fn process_stage(
    State(state): State<AppState>,
    Path((model, file_id)): Path<(String, String)>,
    RequestId(request_id): RequestId,
    body: Option<Json<ProcessRequest>>,
) -> ApiResult<Json<ProcessResponse>> {
    let file_id = parse_file_id(&file_id)?;
    let Json(request) = body.unwrap_or_default();

    let outcome = state
        .runner
        .run(StageRequest {
            file_id,
            model,
            variant: request.variant,
            params: request.params,
            request_id,
        })
        .await?;

    let existing_output = outcome
        .skipped
        .then(|| outcome.output.files.first().cloned())
        .flatten();
    Ok(Json(ProcessResponse {
        output: outcome.output,
        skipped: outcome.skipped,
        existing_output,
    }))
}

/// Per-stage slice of the aggregated status
#[derive(Debug, Serialize)]
pub struct StageStatusView {
    pub complete: bool,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

/// GET /status/:file_id
///
/// Aggregates on-disk completion (the durable truth) with any live jobs.
pub async fn file_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file_id = parse_file_id(&file_id)?;
    let record = state
        .store
        .read_metadata(file_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Unknown file_id: {}", file_id)))?;

    let mut stages = serde_json::Map::new();
    for stage in StageKind::ALL {
        let complete = state.store.stage_complete(file_id, stage);
        let files = if complete {
            state.store.list_stage_files(file_id, stage)?
        } else {
            Vec::new()
        };
        let view = StageStatusView {
            complete,
            files,
            job: state.jobs.get(file_id, stage),
        };
        stages.insert(stage.as_str().to_string(), serde_json::to_value(view)?);
    }

    Ok(Json(json!({
        "file_id": file_id,
        "title": record.title,
        "artist": record.artist,
        "extension": record.extension,
        "size": record.size_bytes,
        "upload_time": record.upload_time,
        "stages": stages,
    })))
}

pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route("/process/:model/:file_id", post(process_stage))
        .route("/status/:file_id", get(file_status))
}
