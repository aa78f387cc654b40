//! Karaoke assembly
//!
//! Builds the karaoke package from prior stage outputs: an LRC lyric file
//! timed across the track, a copy of the instrumental stem, and an info
//! record. Pure text and file work - no model, no GPU. Requires completed
//! separation (instrumental) and transcription (lyric text) for the same
//! file.
//!
//! Line timing distributes timestamps uniformly across the track duration.
//! Word-level alignment from the transcription stage would be better; until
//! that lands this matches the established behavior.

use super::{Params, Processor, ProcessorContext};
use async_trait::async_trait;
use kproc_common::{Error, FileId, Result, StageKind, StageOutput};
use std::path::Path;

/// Fallback when neither the upload probe nor the request supplied a length
const DEFAULT_DURATION_SECONDS: f64 = 180.0;

pub struct KaraokeAssembler;

#[async_trait]
impl Processor for KaraokeAssembler {
    fn name(&self) -> &'static str {
        "karaoke"
    }

    fn stage(&self) -> StageKind {
        StageKind::Karaoke
    }

    fn variants(&self) -> &'static [&'static str] {
        &["standard"]
    }

    fn requires_gpu(&self) -> bool {
        false
    }

    fn dependencies(&self) -> &'static [StageKind] {
        &[StageKind::Separation, StageKind::Transcription]
    }

    fn allowed_params(&self) -> &'static [&'static str] {
        &["duration_seconds"]
    }

    fn expected_outputs(&self, file_id: FileId, _variant: &str, _params: &Params) -> Vec<String> {
        vec![format!("{}_karaoke.lrc", file_id)]
    }

    async fn process(
        &self,
        file_id: FileId,
        _input_path: &Path,
        ctx: &ProcessorContext,
    ) -> Result<StageOutput> {
        let separation = ctx
            .dependencies
            .get(&StageKind::Separation)
            .ok_or_else(|| {
                Error::Precondition("Vocals not found. Please run separation first.".to_string())
            })?;
        let transcription = ctx
            .dependencies
            .get(&StageKind::Transcription)
            .ok_or_else(|| {
                Error::Precondition(
                    "Transcription not found. Please run transcription first.".to_string(),
                )
            })?;

        let record = ctx.store.read_metadata(file_id)?;
        let (title, artist) = record
            .as_ref()
            .map(|r| (r.title.clone(), r.artist.clone()))
            .unwrap_or_else(|| ("Unknown".to_string(), "Unknown Artist".to_string()));

        let duration = ctx
            .params
            .get("duration_seconds")
            .and_then(|v| v.as_f64())
            .or_else(|| record.as_ref().and_then(|r| r.duration_seconds))
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_DURATION_SECONDS);

        ctx.progress.emit(30, "timing lyric lines");
        let text = self.lyric_text(file_id, transcription, ctx)?;
        let lrc = render_lrc(&title, &artist, &text, duration);
        let lrc_name = format!("{}_karaoke.lrc", file_id);
        let lrc_written =
            ctx.store
                .write_stage_file(file_id, self.stage(), &lrc_name, lrc.as_bytes())?;

        ctx.progress.emit(70, "copying instrumental");
        let instrumental = self.copy_instrumental(file_id, separation, ctx)?;

        let line_count = lyric_lines(&text).len();
        let mut info = serde_json::Map::new();
        info.insert("title".to_string(), title.into());
        info.insert("artist".to_string(), artist.into());
        info.insert("duration_seconds".to_string(), serde_json::json!(duration));
        info.insert("lines".to_string(), line_count.into());
        info.insert("lrc".to_string(), lrc_name.clone().into());
        info.insert("instrumental".to_string(), instrumental.clone().into());

        let info_name = format!("{}_karaoke.json", file_id);
        let info_written = ctx.store.write_stage_file(
            file_id,
            self.stage(),
            &info_name,
            &serde_json::to_vec_pretty(&info)?,
        )?;

        let mut output = StageOutput::completed(file_id, self.stage(), &ctx.variant);
        output.files = vec![lrc_written, info_written, instrumental];
        output.files.sort();
        output.result = info;
        Ok(output)
    }
}

impl KaraokeAssembler {
    /// Lyric text from the transcription output, falling back to reading the
    /// marker file when the in-memory result lacks it
    fn lyric_text(
        &self,
        file_id: FileId,
        transcription: &StageOutput,
        ctx: &ProcessorContext,
    ) -> Result<String> {
        if let Some(text) = transcription.result.get("text").and_then(|v| v.as_str()) {
            return Ok(text.to_string());
        }
        let name = transcription
            .files
            .iter()
            .find(|f| f.ends_with(".txt"))
            .ok_or_else(|| {
                Error::Precondition(
                    "Transcription not found. Please run transcription first.".to_string(),
                )
            })?;
        ctx.store
            .read_stage_text(file_id, StageKind::Transcription, name)
    }

    /// Copy the instrumental stem into the karaoke subtree
    fn copy_instrumental(
        &self,
        file_id: FileId,
        separation: &StageOutput,
        ctx: &ProcessorContext,
    ) -> Result<String> {
        let missing =
            || Error::Precondition("Vocals not found. Please run separation first.".to_string());
        let name = separation
            .files
            .iter()
            .find(|f| f.starts_with("no_vocals."))
            .ok_or_else(missing)?;
        let src = ctx
            .store
            .resolve_artifact(file_id, StageKind::Separation, name)?
            .ok_or_else(missing)?;
        ctx.store
            .copy_into_stage(file_id, StageKind::Karaoke, &src, name)
    }
}

/// Non-empty trimmed lyric lines
fn lyric_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Render an LRC document with lines spread uniformly over the duration
fn render_lrc(title: &str, artist: &str, text: &str, duration: f64) -> String {
    let lines = lyric_lines(text);
    let mut out = String::new();
    out.push_str(&format!("[ti:{}]\n", title));
    out.push_str(&format!("[ar:{}]\n", artist));
    out.push_str(&format!(
        "[length:{:02}:{:02}]\n",
        (duration as u64) / 60,
        (duration as u64) % 60
    ));

    if lines.is_empty() {
        out.push_str(&format!("{}♪ Instrumental ♪\n", lrc_timestamp(0.0)));
        return out;
    }

    let count = lines.len() as f64;
    for (i, line) in lines.iter().enumerate() {
        let at = duration * i as f64 / count;
        out.push_str(&format!("{}{}\n", lrc_timestamp(at), line));
    }
    out
}

/// `[mm:ss.xx]` timestamp
fn lrc_timestamp(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let minutes = (clamped / 60.0) as u64;
    let secs = clamped - (minutes as f64) * 60.0;
    format!("[{:02}:{:05.2}]", minutes, secs)
}
