//! Stub processors
//!
//! Lightweight stand-ins for the heavy inference stages. Each one produces
//! the same marker files as its real counterpart - small but syntactically
//! valid - and reports intermediate progress, so every orchestration
//! invariant (skip cache, cleanup, progress fan-out, GPU gating) can be
//! exercised without loading a model. The real implementations live behind
//! the same [`Processor`] trait and are swapped in at registry construction.

use super::{Params, Processor, ProcessorContext};
use async_trait::async_trait;
use kproc_common::{FileId, Result, StageKind, StageOutput};
use std::path::Path;

/// A single silent MPEG-1 Layer III frame (128 kbit/s, 44.1 kHz)
fn mp3_stub_bytes() -> Vec<u8> {
    let mut frame = vec![0u8; 417];
    frame[0] = 0xFF;
    frame[1] = 0xFB;
    frame[2] = 0x90;
    frame
}

/// Minimal PCM WAV: 16-bit mono silence
fn wav_silence(sample_rate: u32, samples: u32) -> Vec<u8> {
    let data_len = samples * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}

fn param_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

// ----------------------------------------------------------------------
// Separation
// ----------------------------------------------------------------------

/// Source separation: vocals + instrumental stems
pub struct SeparationStub;

#[async_trait]
impl Processor for SeparationStub {
    fn name(&self) -> &'static str {
        "separation"
    }

    fn stage(&self) -> StageKind {
        StageKind::Separation
    }

    fn variants(&self) -> &'static [&'static str] {
        &["htdemucs", "htdemucs_ft", "mdx_extra"]
    }

    fn requires_gpu(&self) -> bool {
        true
    }

    fn expected_outputs(&self, _file_id: FileId, _variant: &str, _params: &Params) -> Vec<String> {
        vec!["vocals.*".to_string(), "no_vocals.*".to_string()]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        ctx.progress.emit(30, "loading separation model");
        let bytes = mp3_stub_bytes();
        let vocals = ctx
            .store
            .write_stage_file(file_id, self.stage(), "vocals.mp3", &bytes)?;
        ctx.progress.emit(70, "separating stems");
        let no_vocals =
            ctx.store
                .write_stage_file(file_id, self.stage(), "no_vocals.mp3", &bytes)?;

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![vocals, no_vocals];
        output
            .result
            .insert("stems".to_string(), serde_json::json!(["vocals", "no_vocals"]));
        Ok(output)
    }
}

// ----------------------------------------------------------------------
// Transcription
// ----------------------------------------------------------------------

/// Speech transcription over the uploaded track
pub struct TranscriptionStub;

const STUB_LYRICS: &str = "\
First verse of the uploaded song
Second line carries the melody
Chorus lifts the energy higher
Voices fade into the bridge
Final refrain closes it out";

#[async_trait]
impl Processor for TranscriptionStub {
    fn name(&self) -> &'static str {
        "transcription"
    }

    fn stage(&self) -> StageKind {
        StageKind::Transcription
    }

    fn variants(&self) -> &'static [&'static str] {
        &["base", "small", "medium", "large-v3"]
    }

    fn requires_gpu(&self) -> bool {
        true
    }

    fn expected_outputs(&self, _file_id: FileId, variant: &str, _params: &Params) -> Vec<String> {
        vec![format!("transcription_{}.txt", variant)]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        ctx.progress.emit(40, "transcribing audio");
        let name = format!("transcription_{}.txt", ctx.variant);
        let written =
            ctx.store
                .write_stage_file(file_id, self.stage(), &name, STUB_LYRICS.as_bytes())?;

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![written];
        output
            .result
            .insert("text".to_string(), STUB_LYRICS.into());
        output.result.insert("language".to_string(), "en".into());
        Ok(output)
    }
}

// ----------------------------------------------------------------------
// Analysis
// ----------------------------------------------------------------------

/// LLM audio analysis (task-parameterized)
pub struct AnalysisStub;

#[async_trait]
impl Processor for AnalysisStub {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn stage(&self) -> StageKind {
        StageKind::Analysis
    }

    fn variants(&self) -> &'static [&'static str] {
        &["gemma", "qwen"]
    }

    fn requires_gpu(&self) -> bool {
        true
    }

    fn allowed_params(&self) -> &'static [&'static str] {
        &["task"]
    }

    fn expected_outputs(&self, _file_id: FileId, variant: &str, params: &Params) -> Vec<String> {
        let task = param_str(params, "task").unwrap_or("describe");
        vec![format!("analysis_{}_{}.json", variant, task)]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        let task = param_str(&ctx.params, "task").unwrap_or("describe").to_string();
        ctx.progress.emit(50, "analyzing audio");

        let mut result = serde_json::Map::new();
        result.insert("task".to_string(), task.clone().into());
        result.insert("model".to_string(), ctx.variant.clone().into());
        result.insert(
            "summary".to_string(),
            "Mid-tempo track with prominent vocals and steady percussion.".into(),
        );

        let name = format!("analysis_{}_{}.json", ctx.variant, task);
        let body = serde_json::to_vec_pretty(&result)?;
        let written = ctx.store.write_stage_file(file_id, self.stage(), &name, &body)?;

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![written];
        output.result = result;
        Ok(output)
    }
}

// ----------------------------------------------------------------------
// Generation
// ----------------------------------------------------------------------

/// Music generation from a text prompt
pub struct GenerationStub;

#[async_trait]
impl Processor for GenerationStub {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn stage(&self) -> StageKind {
        StageKind::Generation
    }

    fn variants(&self) -> &'static [&'static str] {
        &["musicgen-small", "musicgen-medium"]
    }

    fn requires_gpu(&self) -> bool {
        true
    }

    fn allowed_params(&self) -> &'static [&'static str] {
        &["prompt", "duration_seconds"]
    }

    fn expected_outputs(&self, _file_id: FileId, variant: &str, _params: &Params) -> Vec<String> {
        vec![format!("generated_{}.wav", variant)]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        let prompt = param_str(&ctx.params, "prompt").unwrap_or("ambient texture");
        ctx.progress.emit(30, "generating audio");

        // A quarter second of silence keeps the artifact tiny but playable.
        let wav = wav_silence(8_000, 2_000);
        let name = format!("generated_{}.wav", ctx.variant);
        let written = ctx.store.write_stage_file(file_id, self.stage(), &name, &wav)?;
        ctx.progress.emit(80, "encoding result");

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![written];
        output.result.insert("prompt".to_string(), prompt.into());
        output
            .result
            .insert("sample_rate".to_string(), 8_000.into());
        Ok(output)
    }
}

// ----------------------------------------------------------------------
// Pitch
// ----------------------------------------------------------------------

/// Key and pitch detection
pub struct PitchStub;

#[async_trait]
impl Processor for PitchStub {
    fn name(&self) -> &'static str {
        "pitch"
    }

    fn stage(&self) -> StageKind {
        StageKind::Pitch
    }

    fn variants(&self) -> &'static [&'static str] {
        &["librosa", "crepe"]
    }

    fn requires_gpu(&self) -> bool {
        false
    }

    fn expected_outputs(&self, _file_id: FileId, variant: &str, _params: &Params) -> Vec<String> {
        vec![format!("pitch_analysis_{}.json", variant)]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        ctx.progress.emit(50, "detecting key");

        let mut result = serde_json::Map::new();
        result.insert("key".to_string(), "C".into());
        result.insert("scale".to_string(), "major".into());
        result.insert("confidence".to_string(), serde_json::json!(0.91));
        result.insert("tuning_offset_cents".to_string(), 0.into());

        let name = format!("pitch_analysis_{}.json", ctx.variant);
        let body = serde_json::to_vec_pretty(&result)?;
        let written = ctx.store.write_stage_file(file_id, self.stage(), &name, &body)?;

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![written];
        output.result = result;
        Ok(output)
    }
}
