//! Stage execution
//!
//! [`StageRunner`] drives a single (file, stage) execution through its state
//! machine: skip-cache check, GPU gate, dependency gate, processor
//! invocation, marker verification, failure cleanup, and progress fan-out.
//! At most one execution runs per (file, stage) pair; a second caller waits
//! on the stage lock, re-checks the cache, and returns the first caller's
//! result.

mod chain;
mod jobs;

pub use chain::run_chain;
pub use jobs::JobTable;

use crate::config::Config;
use crate::gpu::GpuProbe;
use crate::processors::{Params, ProcessorContext, ProgressSink, Registry};
use crate::store::ArtifactStore;
use kproc_common::{
    Error, FileId, Job, JobState, ProgressBus, ProgressEvent, Result, StageKind, StageOutput,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// One stage-execution request
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub file_id: FileId,
    pub model: String,
    pub variant: Option<String>,
    pub params: Params,
    pub request_id: String,
}

/// Result of a stage run, distinguishing cache replays
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: StageOutput,
    /// True when the stage's markers already existed and no processor ran
    pub skipped: bool,
}

pub struct StageRunner {
    store: Arc<ArtifactStore>,
    registry: Arc<Registry>,
    bus: ProgressBus,
    jobs: JobTable,
    /// Serializes executions per (file, stage)
    locks: Mutex<HashMap<(FileId, StageKind), Arc<tokio::sync::Mutex<()>>>>,
    /// Bounds concurrent GPU-requiring stage executions
    gpu_pool: Arc<Semaphore>,
    /// Bounds concurrent CPU/I-O stage executions
    io_pool: Arc<Semaphore>,
}

impl StageRunner {
    pub fn new(
        store: Arc<ArtifactStore>,
        registry: Arc<Registry>,
        bus: ProgressBus,
        jobs: JobTable,
        config: &Config,
        gpu: &dyn GpuProbe,
    ) -> Self {
        let cpu_count = num_cpus::get().max(1);
        let gpu_count = gpu.status().gpu_count.max(1);
        let gpu_permits = (gpu_count * config.gpu_concurrency).min(cpu_count).max(1);

        StageRunner {
            store,
            registry,
            bus,
            jobs,
            locks: Mutex::new(HashMap::new()),
            gpu_pool: Arc::new(Semaphore::new(gpu_permits)),
            io_pool: Arc::new(Semaphore::new(cpu_count)),
        }
    }

    fn stage_lock(&self, file_id: FileId, stage: StageKind) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("stage lock table poisoned");
        locks
            .entry((file_id, stage))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Execute one stage for one file
    pub async fn run(&self, req: StageRequest) -> Result<RunOutcome> {
        let processor = self.registry.get(&req.model)?;
        let stage = processor.stage();
        let variant = self
            .registry
            .resolve_variant(processor.as_ref(), req.variant.as_deref())?;
        self.registry
            .validate_params(processor.as_ref(), &req.params)?;

        let input_path = self.store.find_upload(req.file_id)?.ok_or_else(|| {
            Error::NotFound(format!("Unknown file_id: {}", req.file_id))
        })?;

        self.jobs.upsert(Job::queued(
            req.file_id,
            stage,
            variant.clone(),
            req.request_id.clone(),
        ));

        let lock = self.stage_lock(req.file_id, stage);
        let _guard = lock.lock().await;

        let expected = processor.expected_outputs(req.file_id, &variant, &req.params);

        // Skip cache: all markers present means the stage already ran
        // (possibly by the caller we just waited behind).
        if self.markers_present(req.file_id, stage, &expected) {
            return self.replay_cached(req.file_id, stage, &variant, &req.request_id);
        }

        // GPU gate, before any processor code runs.
        if let Err(e) = self.registry.gpu_gate(processor.as_ref()) {
            self.fail_job(req.file_id, stage, &e);
            return Err(e);
        }

        // Dependency gate (karaoke needs separation + transcription).
        let mut dependencies = HashMap::new();
        for dep in processor.dependencies() {
            match self.store.read_stage_output(req.file_id, *dep)? {
                Some(output) => {
                    dependencies.insert(*dep, output);
                }
                None => {
                    let err = Error::Precondition(missing_dependency_message(*dep));
                    self.fail_job(req.file_id, stage, &err);
                    return Err(err);
                }
            }
        }

        self.jobs.update(req.file_id, stage, |job| {
            job.state = JobState::Running;
            job.progress = 10;
            job.started_at = Some(chrono::Utc::now());
        });
        self.bus.publish(
            ProgressEvent::new(req.file_id, stage, 10, format!("starting {}", stage))
                .with_request_id(req.request_id.clone()),
        );
        info!(
            file_id = %req.file_id,
            stage = %stage,
            variant = %variant,
            request_id = %req.request_id,
            "Stage starting"
        );

        let pool = if processor.requires_gpu() {
            &self.gpu_pool
        } else {
            &self.io_pool
        };
        let _permit = pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker pool closed".to_string()))?;

        let ctx = ProcessorContext {
            variant: variant.clone(),
            params: req.params.clone(),
            progress: ProgressSink::new(
                self.bus.clone(),
                req.file_id,
                stage,
                req.request_id.clone(),
            ),
            dependencies,
            store: Arc::clone(&self.store),
        };

        // Run in a task of its own so a panicking processor cannot unwind
        // through the runner.
        let worker = Arc::clone(&processor);
        let file_id = req.file_id;
        let input = input_path.clone();
        let joined =
            tokio::spawn(async move { worker.process(file_id, &input, &ctx).await }).await;

        let result = match joined {
            Ok(inner) => inner,
            Err(join_err) => Err(Error::Processor(format!(
                "{} worker panicked: {}",
                req.model, join_err
            ))),
        };

        match result {
            Ok(output) => self.finish_success(
                req.file_id,
                stage,
                &variant,
                &expected,
                &req.request_id,
                output,
            ),
            Err(err) => self.finish_failure(req.file_id, stage, &expected, &req.request_id, err),
        }
    }

    /// Are all marker patterns satisfied for this exact request?
    fn markers_present(&self, file_id: FileId, stage: StageKind, expected: &[String]) -> bool {
        expected
            .iter()
            .all(|p| self.store.find_marker(file_id, stage, p).is_some())
    }

    /// Cache hit: rebuild the output from disk, emit the terminal event
    fn replay_cached(
        &self,
        file_id: FileId,
        stage: StageKind,
        variant: &str,
        request_id: &str,
    ) -> Result<RunOutcome> {
        let mut output = self
            .store
            .read_stage_output(file_id, stage)?
            .unwrap_or_else(|| StageOutput::completed(file_id, stage, variant));
        output.variant = variant.to_string();

        self.jobs.update(file_id, stage, |job| {
            job.state = JobState::Skipped;
            job.progress = 100;
            job.finished_at = Some(chrono::Utc::now());
        });
        self.bus.publish(
            ProgressEvent::new(file_id, stage, 100, format!("{} skipped (cached)", stage))
                .with_request_id(request_id),
        );
        info!(file_id = %file_id, stage = %stage, "Stage skipped, markers present");

        Ok(RunOutcome {
            output,
            skipped: true,
        })
    }

    fn finish_success(
        &self,
        file_id: FileId,
        stage: StageKind,
        variant: &str,
        expected: &[String],
        request_id: &str,
        mut output: StageOutput,
    ) -> Result<RunOutcome> {
        // A processor that returned Ok without leaving its markers behind is
        // as broken as one that raised.
        let missing: Vec<&String> = expected
            .iter()
            .filter(|p| self.store.find_marker(file_id, stage, p).is_none())
            .collect();
        if !missing.is_empty() {
            let err = Error::Processor(format!(
                "{} completed without expected outputs: {}",
                stage,
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            return self.finish_failure(file_id, stage, expected, request_id, err);
        }

        if output.files.is_empty() {
            output.files = self.store.list_stage_files(file_id, stage)?;
        }
        // Cached replays list files in sorted order; fresh runs match.
        output.files.sort();
        output.variant = variant.to_string();

        self.jobs.update(file_id, stage, |job| {
            job.state = JobState::Completed;
            job.progress = 100;
            job.finished_at = Some(chrono::Utc::now());
        });
        self.bus.publish(
            ProgressEvent::new(file_id, stage, 100, format!("{} complete", stage))
                .with_request_id(request_id),
        );
        info!(file_id = %file_id, stage = %stage, files = output.files.len(), "Stage complete");

        Ok(RunOutcome {
            output,
            skipped: false,
        })
    }

    /// Failure path: scrub partial outputs, record the job, emit terminal
    fn finish_failure(
        &self,
        file_id: FileId,
        stage: StageKind,
        expected: &[String],
        request_id: &str,
        err: Error,
    ) -> Result<RunOutcome> {
        // Scrub exactly this request's expected outputs; other variants'
        // completed artifacts stay. Karaoke also sweeps its side artifacts
        // (info record, instrumental copy).
        let mut patterns = expected.to_vec();
        if stage == StageKind::Karaoke {
            patterns.extend(crate::store::stage_listing_patterns(stage, file_id));
        }
        self.store.cleanup_stage(file_id, stage, &patterns);
        self.fail_job(file_id, stage, &err);
        self.bus.publish(
            ProgressEvent::failed(file_id, stage, format!("{} failed", stage), err.to_string())
                .with_request_id(request_id),
        );
        warn!(file_id = %file_id, stage = %stage, error = %err, "Stage failed");
        Err(err)
    }

    fn fail_job(&self, file_id: FileId, stage: StageKind, err: &Error) {
        let message = err.to_string();
        self.jobs.update(file_id, stage, |job| {
            job.state = JobState::Failed;
            job.progress = 100;
            job.finished_at = Some(chrono::Utc::now());
            job.error = Some(message);
        });
    }
}

fn missing_dependency_message(dep: StageKind) -> String {
    match dep {
        StageKind::Separation => "Vocals not found. Please run separation first.".to_string(),
        StageKind::Transcription => {
            "Transcription not found. Please run transcription first.".to_string()
        }
        other => format!("{} output not found. Please run {} first.", other, other),
    }
}
