//! kproc-server binary
//!
//! Startup order: tracing, configuration (CLI → env → TOML → defaults),
//! artifact store + registry + progress bus, then the axum server. Ctrl-C
//! closes the progress bus before the listener stops so WebSocket
//! subscribers terminate cleanly.

use anyhow::Result;
use clap::Parser;
use kproc_server::config::{Cli, Config};
use kproc_server::gpu::{GpuProbe, GpuStatus, StaticGpuProbe, SystemGpuProbe};
use kproc_server::{build_router, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(&cli)?;

    info!("Starting kproc-server (audio processing backend)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        upload_dir = %config.upload_dir.display(),
        output_dir = %config.output_dir.display(),
        "Artifact directories"
    );

    let gpu: Arc<dyn GpuProbe> = if config.ci_smoke_mode {
        info!("Smoke mode: stub processors, GPU checks skipped");
        Arc::new(StaticGpuProbe(GpuStatus::unavailable()))
    } else {
        Arc::new(SystemGpuProbe::new())
    };

    let status = gpu.status();
    info!(
        available = status.available,
        gpu_count = status.gpu_count,
        "GPU probe"
    );

    let port = config.port;
    let state = AppState::new(config, gpu)?;
    let bus = state.bus.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, closing progress bus");
            bus.close();
        })
        .await?;

    Ok(())
}
