//! Processor interface and the model registry
//!
//! A [`Processor`] is one stage worker: it declares its stage, accepted
//! variants, GPU requirement, and the marker files it produces, and does its
//! work against the artifact store through [`ProcessorContext`]. The
//! registry maps model names to processors and enforces the GPU gate before
//! any heavy processor is dispatched - there is never a CPU fallback.

mod karaoke;
mod stubs;

pub use karaoke::KaraokeAssembler;
pub use stubs::{
    AnalysisStub, GenerationStub, PitchStub, SeparationStub, TranscriptionStub,
};

use crate::gpu::GpuProbe;
use crate::store::ArtifactStore;
use async_trait::async_trait;
use kproc_common::{
    Error, FileId, ProgressBus, ProgressEvent, Result, StageKind, StageOutput,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Stage-specific request parameters (task, prompt, duration, ...)
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Progress reporter handed to processors
///
/// Forwards to the progress bus, clamped into the intermediate window
/// (10–99) and kept monotonic; the stage runner owns the terminal event.
pub struct ProgressSink {
    bus: ProgressBus,
    file_id: FileId,
    stage: StageKind,
    request_id: String,
    last: AtomicU8,
}

impl ProgressSink {
    pub fn new(
        bus: ProgressBus,
        file_id: FileId,
        stage: StageKind,
        request_id: impl Into<String>,
    ) -> Self {
        ProgressSink {
            bus,
            file_id,
            stage,
            request_id: request_id.into(),
            last: AtomicU8::new(10),
        }
    }

    /// Report intermediate progress (percent 0-100, clamped to 10-99)
    pub fn emit(&self, percent: u8, message: &str) {
        let clamped = percent.clamp(10, 99);
        let previous = self.last.fetch_max(clamped, Ordering::AcqRel);
        let monotonic = clamped.max(previous);
        self.bus.publish(
            ProgressEvent::new(self.file_id, self.stage, monotonic, message)
                .with_request_id(self.request_id.clone()),
        );
    }
}

/// Everything a processor needs for one execution
pub struct ProcessorContext {
    /// Which model flavor to run
    pub variant: String,
    pub params: Params,
    pub progress: ProgressSink,
    /// Outputs of prior stages this one reads (karaoke: separation +
    /// transcription)
    pub dependencies: HashMap<StageKind, StageOutput>,
    pub store: Arc<ArtifactStore>,
}

/// One stage worker
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> StageKind;

    /// Accepted variants; the first is the default
    fn variants(&self) -> &'static [&'static str];

    fn default_variant(&self) -> &'static str {
        self.variants()[0]
    }

    fn requires_gpu(&self) -> bool;

    /// Stages whose outputs must exist before this one can run
    fn dependencies(&self) -> &'static [StageKind] {
        &[]
    }

    /// Parameter keys this stage accepts; anything else is rejected at
    /// endpoint entry
    fn allowed_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Marker patterns this stage produces for the given request
    ///
    /// `*` in a pattern matches any run of characters. Presence of every
    /// pattern is the skip-cache key; the same patterns drive cleanup when
    /// the processor fails.
    fn expected_outputs(&self, file_id: FileId, variant: &str, params: &Params) -> Vec<String>;

    /// Execute the stage against the source file
    async fn process(
        &self,
        file_id: FileId,
        input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput>;
}

/// Advertised capabilities of one registered model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub variants: Vec<String>,
    pub default: String,
    pub requires_gpu: bool,
}

/// Lookup table from model name to processor, plus the GPU gate
pub struct Registry {
    processors: BTreeMap<&'static str, Arc<dyn Processor>>,
    gpu: Arc<dyn GpuProbe>,
    /// Smoke mode skips the GPU gate so stub runs work anywhere
    ci_smoke_mode: bool,
}

impl Registry {
    pub fn new(gpu: Arc<dyn GpuProbe>, ci_smoke_mode: bool) -> Self {
        Registry {
            processors: BTreeMap::new(),
            gpu,
            ci_smoke_mode,
        }
    }

    /// Registry with the built-in processor set
    pub fn with_builtin(gpu: Arc<dyn GpuProbe>, ci_smoke_mode: bool) -> Self {
        let mut registry = Registry::new(gpu, ci_smoke_mode);
        registry.register(Arc::new(SeparationStub));
        registry.register(Arc::new(TranscriptionStub));
        registry.register(Arc::new(AnalysisStub));
        registry.register(Arc::new(GenerationStub));
        registry.register(Arc::new(PitchStub));
        registry.register(Arc::new(KaraokeAssembler));
        registry
    }

    /// Register a processor under its own name; later registrations win
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.name(), processor);
    }

    pub fn get(&self, model_name: &str) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(model_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Unknown model: {}", model_name)))
    }

    /// Advertised model table for `/models` and `/health`
    pub fn list_models(&self) -> BTreeMap<String, ModelInfo> {
        self.processors
            .iter()
            .map(|(name, p)| {
                (
                    name.to_string(),
                    ModelInfo {
                        variants: p.variants().iter().map(|v| v.to_string()).collect(),
                        default: p.default_variant().to_string(),
                        requires_gpu: p.requires_gpu(),
                    },
                )
            })
            .collect()
    }

    /// Fail fast when a GPU-requiring processor has no GPU to run on
    ///
    /// Checked before dispatch; the processor itself is never invoked on
    /// failure.
    pub fn gpu_gate(&self, processor: &dyn Processor) -> Result<()> {
        if !processor.requires_gpu() || self.ci_smoke_mode {
            return Ok(());
        }
        if self.gpu.status().available {
            Ok(())
        } else {
            Err(Error::GpuRequired)
        }
    }

    /// Reject request parameters the processor does not declare
    pub fn validate_params(&self, processor: &dyn Processor, params: &Params) -> Result<()> {
        let allowed = processor.allowed_params();
        for key in params.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Unknown parameter '{}' for model '{}'",
                    key,
                    processor.name()
                )));
            }
        }
        Ok(())
    }

    /// Resolve and validate the variant for a request
    pub fn resolve_variant(
        &self,
        processor: &dyn Processor,
        requested: Option<&str>,
    ) -> Result<String> {
        match requested {
            None => Ok(processor.default_variant().to_string()),
            Some(v) if processor.variants().contains(&v) => Ok(v.to_string()),
            Some(v) => Err(Error::InvalidInput(format!(
                "Unknown variant '{}' for model '{}' (accepted: {})",
                v,
                processor.name(),
                processor.variants().join(", ")
            ))),
        }
    }
}
