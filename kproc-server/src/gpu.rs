//! GPU availability probing
//!
//! The probe is a pure query: it shells out to `nvidia-smi` (with a short
//! cache so request bursts don't spawn a process each) and never loads any
//! inference runtime. Heavy processors are gated on this before dispatch;
//! there is no CPU fallback.

use serde::Serialize;
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Snapshot of GPU availability
#[derive(Debug, Clone, Serialize)]
pub struct GpuStatus {
    pub available: bool,
    pub gpu_count: usize,
    pub devices: Vec<String>,
    /// Whether the inference runtime is present on this host. The Rust
    /// service never embeds it; the field is kept for client compatibility
    /// and mirrors device availability for the system probe.
    pub torch_installed: bool,
}

impl GpuStatus {
    pub fn unavailable() -> Self {
        GpuStatus {
            available: false,
            gpu_count: 0,
            devices: Vec::new(),
            torch_installed: false,
        }
    }

    pub fn available(devices: Vec<String>) -> Self {
        GpuStatus {
            available: !devices.is_empty(),
            gpu_count: devices.len(),
            torch_installed: !devices.is_empty(),
            devices,
        }
    }
}

/// GPU status collaborator consumed by the processor registry
pub trait GpuProbe: Send + Sync {
    fn status(&self) -> GpuStatus;
}

/// Fixed status, for tests and smoke mode
pub struct StaticGpuProbe(pub GpuStatus);

impl GpuProbe for StaticGpuProbe {
    fn status(&self) -> GpuStatus {
        self.0.clone()
    }
}

/// Probes via `nvidia-smi`, caching the result briefly
pub struct SystemGpuProbe {
    cache: Mutex<Option<(Instant, GpuStatus)>>,
    ttl: Duration,
}

impl SystemGpuProbe {
    pub fn new() -> Self {
        SystemGpuProbe {
            cache: Mutex::new(None),
            ttl: Duration::from_secs(5),
        }
    }

    fn probe() -> GpuStatus {
        // CUDA_VISIBLE_DEVICES="" hides all devices regardless of hardware.
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            if visible.trim().is_empty() || visible.trim() == "-1" {
                debug!("CUDA_VISIBLE_DEVICES hides all devices");
                return GpuStatus::unavailable();
            }
        }

        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let devices: Vec<String> = String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                debug!(count = devices.len(), "nvidia-smi reported devices");
                GpuStatus::available(devices)
            }
            _ => GpuStatus::unavailable(),
        }
    }
}

impl Default for SystemGpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe for SystemGpuProbe {
    fn status(&self) -> GpuStatus {
        let mut cache = self.cache.lock().expect("gpu probe cache poisoned");
        if let Some((at, status)) = cache.as_ref() {
            if at.elapsed() < self.ttl {
                return status.clone();
            }
        }
        let status = Self::probe();
        *cache = Some((Instant::now(), status.clone()));
        status
    }
}
