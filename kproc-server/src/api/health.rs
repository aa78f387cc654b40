//! Health, GPU status, and model listing endpoints

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub available_models: Vec<String>,
    pub websocket_support: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        available_models: state.registry.list_models().into_keys().collect(),
        websocket_support: true,
        timestamp: chrono::Utc::now(),
    })
}

/// GET /status - liveness probe
pub async fn status_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /gpu-status
///
/// A pure query against the GPU probe; never loads a model.
pub async fn gpu_status(State(state): State<AppState>) -> Json<crate::gpu::GpuStatus> {
    Json(state.gpu.status())
}

/// GET /models
pub async fn list_models(
    State(state): State<AppState>,
) -> Json<std::collections::BTreeMap<String, crate::processors::ModelInfo>> {
    Json(state.registry.list_models())
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_check))
        .route("/gpu-status", get(gpu_status))
        .route("/models", get(list_models))
}
