//! kproc-server - AI audio processing backend
//!
//! Accepts uploaded audio tracks, routes them through a pipeline of
//! inference stages (separation, transcription, analysis, generation,
//! pitch, karaoke assembly), tracks progress in real time over WebSocket,
//! and serves structured results plus downloadable artifacts.
//!
//! The orchestration layer is the product: per-file idempotency and
//! deduplication, skip-if-cached stage execution, concurrent progress
//! fan-out, request tracing, and the on-disk artifact store that binds it
//! together. The inference models themselves sit behind the `Processor`
//! trait and are replaceable.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod processors;
pub mod store;
pub mod upload;

use axum::http::{HeaderName, HeaderValue};
use axum::{middleware, Router};
use config::Config;
use gpu::GpuProbe;
use kproc_common::{ProgressBus, Result};
use pipeline::{JobTable, StageRunner};
use processors::Registry;
use std::sync::Arc;
use store::ArtifactStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use upload::UploadPipeline;

/// Application state shared across handlers
///
/// Constructed once at startup and handed to the router; tests build their
/// own with stub probes and temp directories.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ArtifactStore>,
    pub registry: Arc<Registry>,
    pub bus: ProgressBus,
    pub jobs: JobTable,
    pub runner: Arc<StageRunner>,
    pub uploader: Arc<UploadPipeline>,
    pub gpu: Arc<dyn GpuProbe>,
}

impl AppState {
    pub fn new(config: Config, gpu: Arc<dyn GpuProbe>) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(ArtifactStore::open(config.as_ref())?);
        let registry = Arc::new(Registry::with_builtin(
            Arc::clone(&gpu),
            config.ci_smoke_mode,
        ));
        let bus = ProgressBus::new(config.progress_queue_size);
        let jobs = JobTable::new();
        let runner = Arc::new(StageRunner::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            bus.clone(),
            jobs.clone(),
            config.as_ref(),
            gpu.as_ref(),
        ));
        let uploader = Arc::new(UploadPipeline::new(
            Arc::clone(&store),
            Arc::clone(&config),
        ));

        Ok(AppState {
            config,
            store,
            registry,
            bus,
            jobs,
            runner,
            uploader,
            gpu,
        })
    }
}

/// Build the application router
///
/// The request-context middleware sits outermost so it stamps request IDs
/// and shapes error bodies after every other layer has run.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::upload_routes(state.config.as_ref()))
        .merge(api::process_routes())
        .merge(api::songs_routes())
        .merge(api::download_routes())
        .merge(api::ws_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.as_ref()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            context::request_context,
        ))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static("x-request-id")]);

    if config.cors_origins.trim() == "*" {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .split(',')
            .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
            .collect();
        layer.allow_origin(origins)
    }
}
