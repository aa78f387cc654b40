//! Core data model for uploads, stages, and jobs
//!
//! These types are shared between the server components and its integration
//! tests. Stage completion is never tracked here - the artifact store's
//! marker files on disk are the single source of truth for "has this stage
//! already run?".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque 128-bit identifier for one uploaded audio asset
///
/// Rendered as a hyphenated UUID everywhere it crosses a boundary (URLs,
/// JSON bodies, directory names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub Uuid);

impl FileId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(FileId)
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The processing stages a file can pass through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Separation,
    Transcription,
    Analysis,
    Generation,
    Pitch,
    Karaoke,
}

impl StageKind {
    /// All stages, in default-chain-friendly order
    pub const ALL: [StageKind; 6] = [
        StageKind::Separation,
        StageKind::Transcription,
        StageKind::Analysis,
        StageKind::Generation,
        StageKind::Pitch,
        StageKind::Karaoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Separation => "separation",
            StageKind::Transcription => "transcription",
            StageKind::Analysis => "analysis",
            StageKind::Generation => "generation",
            StageKind::Pitch => "pitch",
            StageKind::Karaoke => "karaoke",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separation" => Ok(StageKind::Separation),
            "transcription" => Ok(StageKind::Transcription),
            "analysis" => Ok(StageKind::Analysis),
            "generation" => Ok(StageKind::Generation),
            "pitch" => Ok(StageKind::Pitch),
            "karaoke" => Ok(StageKind::Karaoke),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown stage: {}",
                other
            ))),
        }
    }
}

/// Per-file metadata, persisted as `metadata.json` next to the stage outputs
///
/// Every entry in the artifact store has exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub file_id: FileId,
    /// Raw client-supplied name, kept verbatim for fingerprinting
    pub original_filename: String,
    /// Filesystem-safe rendition of the original name
    pub sanitized_filename: String,
    pub title: String,
    pub artist: String,
    pub size_bytes: u64,
    /// Lowercased, without the leading dot
    pub extension: String,
    pub upload_time: DateTime<Utc>,
    /// Duplicate-detection key (normalized original filename)
    pub content_fingerprint: String,
    /// Probed track length, used for karaoke line timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Terminal status of a stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// Result record for one (file, stage) execution
///
/// Reconstructed from marker files on cache hits; never stored in a
/// separate index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub file_id: FileId,
    pub stage: StageKind,
    /// Model flavor that produced the output (e.g. "htdemucs")
    pub variant: String,
    pub status: StageStatus,
    /// Artifact paths relative to the per-file output directory
    pub files: Vec<String>,
    /// Stage-specific structured data (detected key, transcription text, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub result: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutput {
    /// A completed output with no structured result yet
    pub fn completed(file_id: FileId, stage: StageKind, variant: impl Into<String>) -> Self {
        StageOutput {
            file_id,
            stage,
            variant: variant.into(),
            status: StageStatus::Completed,
            files: Vec::new(),
            result: serde_json::Map::new(),
            error: None,
        }
    }
}

/// Lifecycle of an in-flight stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Live in-memory record of a stage execution
///
/// Jobs exist only for the lifetime of the process; completion state is
/// durable through the artifact store, not through jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub file_id: FileId,
    pub stage: StageKind,
    pub variant: String,
    pub state: JobState,
    /// 0-100
    pub progress: u8,
    /// The X-Request-ID that initiated this job
    pub request_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn queued(
        file_id: FileId,
        stage: StageKind,
        variant: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Job {
            file_id,
            stage,
            variant: variant.into(),
            state: JobState::Queued,
            progress: 0,
            request_id: request_id.into(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_round_trips_through_display() {
        let id = FileId::new();
        let parsed = FileId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn file_id_rejects_garbage() {
        assert!(FileId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn stage_kind_round_trips_through_str() {
        for stage in StageKind::ALL {
            assert_eq!(stage.as_str().parse::<StageKind>().unwrap(), stage);
        }
    }

    #[test]
    fn stage_kind_serializes_snake_case() {
        let json = serde_json::to_string(&StageKind::Transcription).unwrap();
        assert_eq!(json, "\"transcription\"");
    }

    #[test]
    fn upload_record_round_trips_without_duration() {
        let record = UploadRecord {
            file_id: FileId::new(),
            original_filename: "Adele - Hello.mp3".to_string(),
            sanitized_filename: "Adele_-_Hello.mp3".to_string(),
            title: "Hello".to_string(),
            artist: "Adele".to_string(),
            size_bytes: 6_291_456,
            extension: "mp3".to_string(),
            upload_time: Utc::now(),
            content_fingerprint: "adele - hello.mp3".to_string(),
            duration_seconds: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("duration_seconds"));

        let parsed: UploadRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.file_id, record.file_id);
        assert_eq!(parsed.title, "Hello");
        assert_eq!(parsed.duration_seconds, None);
    }

    #[test]
    fn stage_output_omits_empty_fields() {
        let output = StageOutput::completed(FileId::new(), StageKind::Separation, "htdemucs");
        let json = serde_json::to_string(&output).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }
}
