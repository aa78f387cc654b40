//! Content-addressed on-disk artifact store
//!
//! Owns the canonical layout:
//!
//! ```text
//! <upload_dir>/<file_id>.<ext>               original upload
//! <output_dir>/<file_id>/metadata.json       UploadRecord
//! <output_dir>/<file_id>/<stage files...>    vocals.mp3, transcription_base.txt, ...
//! <output_dir>/<karaoke_subdir>/<file_id>/   karaoke stage outputs
//! ```
//!
//! The filesystem is the index: a stage is complete iff its marker files
//! exist. No caller composes paths itself; everything goes through this
//! store. All writes are atomic at artifact granularity (temp file +
//! rename), so readers never observe a half-written artifact.

use crate::config::Config;
use kproc_common::{Error, FileId, Result, StageKind, StageOutput, StageStatus, UploadRecord};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of a best-effort delete sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub warnings: Vec<String>,
}

impl DeleteReport {
    /// True when the sweep found nothing to delete at all
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.warnings.is_empty()
    }
}

pub struct ArtifactStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    karaoke_dir: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating its directory tree if needed
    pub fn open(config: &Config) -> Result<Self> {
        let store = ArtifactStore {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            karaoke_dir: config.karaoke_dir(),
        };
        for dir in [&store.upload_dir, &store.output_dir, &store.karaoke_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::storage(dir.display().to_string(), e))?;
        }
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Write the original upload atomically; returns the final path
    pub fn write_upload(&self, file_id: FileId, bytes: &[u8], ext: &str) -> Result<PathBuf> {
        let final_path = self.upload_dir.join(format!("{}.{}", file_id, ext));
        atomic_write(&final_path, bytes)?;
        debug!(file_id = %file_id, path = %final_path.display(), "Upload written");
        Ok(final_path)
    }

    /// Locate the original upload for a file, if present
    pub fn find_upload(&self, file_id: FileId) -> Result<Option<PathBuf>> {
        if let Some(record) = self.read_metadata(file_id)? {
            let path = self
                .upload_dir
                .join(format!("{}.{}", file_id, record.extension));
            if path.exists() {
                return Ok(Some(path));
            }
        }
        // Fall back to a directory scan: the metadata may be gone while the
        // source file survived a partial delete.
        let prefix = format!("{}.", file_id);
        for entry in fs::read_dir(&self.upload_dir)
            .map_err(|e| Error::storage(self.upload_dir.display().to_string(), e))?
        {
            let entry = entry.map_err(|e| Error::storage(self.upload_dir.display().to_string(), e))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&prefix) {
                    return Ok(Some(entry.path()));
                }
            }
        }
        Ok(None)
    }

    /// Remove the original upload (upload-rollback path)
    pub fn remove_upload(&self, file_id: FileId, ext: &str) {
        let path = self.upload_dir.join(format!("{}.{}", file_id, ext));
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to roll back upload");
            }
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn write_metadata(&self, file_id: FileId, record: &UploadRecord) -> Result<()> {
        let dir = self.file_dir(file_id);
        fs::create_dir_all(&dir).map_err(|e| Error::storage(dir.display().to_string(), e))?;
        let path = dir.join("metadata.json");
        let json = serde_json::to_vec_pretty(record)?;
        atomic_write(&path, &json)
    }

    pub fn read_metadata(&self, file_id: FileId) -> Result<Option<UploadRecord>> {
        let path = self.file_dir(file_id).join("metadata.json");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(path.display().to_string(), e)),
        };
        let record = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Scan every persisted UploadRecord
    ///
    /// Records that fail to parse are skipped with a warning so one corrupt
    /// entry cannot take down listings.
    pub fn iter_all_uploads(&self) -> Result<Vec<UploadRecord>> {
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.output_dir)
            .map_err(|e| Error::storage(self.output_dir.display().to_string(), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::storage(self.output_dir.display().to_string(), e))?;
            let path = entry.path();
            if !path.is_dir() || path == self.karaoke_dir {
                continue;
            }
            let metadata_path = path.join("metadata.json");
            if !metadata_path.exists() {
                continue;
            }
            match fs::read_to_string(&metadata_path) {
                Ok(content) => match serde_json::from_str::<UploadRecord>(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(path = %metadata_path.display(), error = %e, "Skipping unparseable metadata");
                    }
                },
                Err(e) => {
                    warn!(path = %metadata_path.display(), error = %e, "Skipping unreadable metadata");
                }
            }
        }
        records.sort_by(|a, b| a.upload_time.cmp(&b.upload_time));
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Stage artifacts
    // ------------------------------------------------------------------

    /// Directory a stage writes into (karaoke has its own subtree)
    fn stage_dir(&self, file_id: FileId, stage: StageKind) -> PathBuf {
        match stage {
            StageKind::Karaoke => self.karaoke_dir.join(file_id.to_string()),
            _ => self.file_dir(file_id),
        }
    }

    fn file_dir(&self, file_id: FileId) -> PathBuf {
        self.output_dir.join(file_id.to_string())
    }

    /// Write a stage artifact atomically; returns the stage-relative name
    pub fn write_stage_file(
        &self,
        file_id: FileId,
        stage: StageKind,
        name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        validate_artifact_name(name)?;
        let dir = self.stage_dir(file_id, stage);
        fs::create_dir_all(&dir).map_err(|e| Error::storage(dir.display().to_string(), e))?;
        atomic_write(&dir.join(name), bytes)?;
        Ok(name.to_string())
    }

    /// Copy an existing file into a stage directory (atomic via temp+rename)
    pub fn copy_into_stage(
        &self,
        file_id: FileId,
        stage: StageKind,
        src: &Path,
        name: &str,
    ) -> Result<String> {
        let bytes = fs::read(src).map_err(|e| Error::storage(src.display().to_string(), e))?;
        self.write_stage_file(file_id, stage, name, &bytes)
    }

    /// Read a stage artifact as text
    pub fn read_stage_text(&self, file_id: FileId, stage: StageKind, name: &str) -> Result<String> {
        validate_artifact_name(name)?;
        let path = self.stage_dir(file_id, stage).join(name);
        fs::read_to_string(&path).map_err(|e| Error::storage(path.display().to_string(), e))
    }

    /// Resolve a stage artifact to its absolute path, if it exists
    ///
    /// `name` must be a bare filename; anything resembling a path is
    /// rejected before touching the filesystem.
    pub fn resolve_artifact(
        &self,
        file_id: FileId,
        stage: StageKind,
        name: &str,
    ) -> Result<Option<PathBuf>> {
        validate_artifact_name(name)?;
        let path = self.stage_dir(file_id, stage).join(name);
        Ok(path.is_file().then_some(path))
    }

    /// Resolve any file in a file's output directory (download endpoint)
    pub fn resolve_output_file(&self, file_id: FileId, name: &str) -> Result<Option<PathBuf>> {
        validate_artifact_name(name)?;
        let path = self.file_dir(file_id).join(name);
        Ok(path.is_file().then_some(path))
    }

    /// List a stage's artifacts (stage-relative names, sorted)
    pub fn list_stage_files(&self, file_id: FileId, stage: StageKind) -> Result<Vec<String>> {
        let dir = self.stage_dir(file_id, stage);
        let patterns = stage_listing_patterns(stage, file_id);
        let mut files = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(Error::storage(dir.display().to_string(), e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(dir.display().to_string(), e))?;
            if let Some(name) = entry.file_name().to_str() {
                if patterns.iter().any(|p| pattern_matches(p, name)) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// True iff every marker pattern for the stage has at least one match
    pub fn stage_complete(&self, file_id: FileId, stage: StageKind) -> bool {
        let patterns = stage_patterns(stage, file_id);
        patterns
            .iter()
            .all(|p| self.find_marker(file_id, stage, p).is_some())
    }

    /// First artifact matching a marker pattern, if any
    pub fn find_marker(&self, file_id: FileId, stage: StageKind, pattern: &str) -> Option<String> {
        let dir = self.stage_dir(file_id, stage);
        let entries = fs::read_dir(&dir).ok()?;
        let mut matches: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|name| pattern_matches(pattern, name))
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Reconstruct a completed stage's output record from its marker files
    ///
    /// Returns `None` when the stage has not completed. The `result` map is
    /// rehydrated from the marker content where the stage persists one
    /// (transcription text, analysis/pitch JSON, karaoke info).
    pub fn read_stage_output(
        &self,
        file_id: FileId,
        stage: StageKind,
    ) -> Result<Option<StageOutput>> {
        if !self.stage_complete(file_id, stage) {
            return Ok(None);
        }
        let files = self.list_stage_files(file_id, stage)?;
        let variant = parse_variant(stage, &files).unwrap_or_else(|| "unknown".to_string());
        let mut output = StageOutput {
            file_id,
            stage,
            variant,
            status: StageStatus::Completed,
            files: files.clone(),
            result: serde_json::Map::new(),
            error: None,
        };

        match stage {
            StageKind::Transcription => {
                if let Some(name) = files.iter().find(|f| f.ends_with(".txt")) {
                    if let Ok(text) = self.read_stage_text(file_id, stage, name) {
                        output.result.insert("text".to_string(), text.into());
                    }
                }
            }
            StageKind::Analysis | StageKind::Pitch | StageKind::Karaoke => {
                if let Some(name) = files.iter().find(|f| f.ends_with(".json")) {
                    if let Ok(text) = self.read_stage_text(file_id, stage, name) {
                        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&text) {
                            output.result = map;
                        }
                    }
                }
            }
            StageKind::Separation | StageKind::Generation => {}
        }

        Ok(Some(output))
    }

    /// Delete stage artifacts matching the given patterns (failure cleanup)
    ///
    /// Only files matching the patterns go; artifacts of other stages in the
    /// same directory are untouched.
    pub fn cleanup_stage(&self, file_id: FileId, stage: StageKind, patterns: &[String]) {
        let dir = self.stage_dir(file_id, stage);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            if name == "metadata.json" {
                continue;
            }
            if patterns.iter().any(|p| pattern_matches(p, &name)) {
                let path = entry.path();
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "Removed partial stage output"),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove partial output")
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove every artifact belonging to a file across all subtrees
    ///
    /// Best-effort: failures are collected into the report, never raised.
    /// Idempotent - deleting a missing file yields an empty report.
    pub fn delete_file(&self, file_id: FileId) -> DeleteReport {
        let mut report = DeleteReport::default();

        // Original upload (extension may be unknown if metadata is gone).
        let prefix = format!("{}.", file_id);
        if let Ok(entries) = fs::read_dir(&self.upload_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(&prefix) {
                    remove_file_into(&entry.path(), &mut report);
                }
            }
        }

        // Output and karaoke subtrees.
        for dir in [self.file_dir(file_id), self.karaoke_dir.join(file_id.to_string())] {
            if dir.exists() {
                remove_tree_into(&dir, &mut report);
            }
        }

        debug!(
            file_id = %file_id,
            deleted = report.deleted.len(),
            warnings = report.warnings.len(),
            "Delete sweep finished"
        );
        report
    }
}

/// Marker patterns that indicate a stage has completed (variant-agnostic)
///
/// A `*` matches any run of characters within a filename.
pub fn stage_patterns(stage: StageKind, file_id: FileId) -> Vec<String> {
    match stage {
        StageKind::Separation => vec!["vocals.*".to_string(), "no_vocals.*".to_string()],
        StageKind::Transcription => vec!["transcription_*.txt".to_string()],
        StageKind::Analysis => vec!["analysis_*.json".to_string()],
        StageKind::Pitch => vec!["pitch_analysis_*.json".to_string()],
        StageKind::Generation => vec!["generated_*.wav".to_string()],
        StageKind::Karaoke => vec![format!("{}_karaoke.lrc", file_id)],
    }
}

/// Patterns covering everything a stage may leave behind
///
/// A superset of the completion markers: the karaoke stage also carries an
/// info record and the instrumental copy, which belong in listings and
/// downloads without being required for completeness.
pub fn stage_listing_patterns(stage: StageKind, file_id: FileId) -> Vec<String> {
    match stage {
        StageKind::Karaoke => vec![
            format!("{}_karaoke.*", file_id),
            "no_vocals.*".to_string(),
        ],
        other => stage_patterns(other, file_id),
    }
}

/// Glob-lite matcher: `*` matches any run of characters, everything else is
/// literal. Supports multiple wildcards.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if part.is_empty() {
            continue;
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

/// Recover the variant a marker file was produced with, where the filename
/// encodes it (separation markers carry no variant)
fn parse_variant(stage: StageKind, files: &[String]) -> Option<String> {
    let (prefix, suffix) = match stage {
        StageKind::Transcription => ("transcription_", ".txt"),
        StageKind::Pitch => ("pitch_analysis_", ".json"),
        StageKind::Generation => ("generated_", ".wav"),
        StageKind::Analysis => ("analysis_", ".json"),
        _ => return None,
    };
    let name = files
        .iter()
        .find(|f| f.starts_with(prefix) && f.ends_with(suffix))?;
    let middle = &name[prefix.len()..name.len() - suffix.len()];
    // Analysis markers are analysis_<variant>_<task>.json.
    let variant = match stage {
        StageKind::Analysis => middle.split('_').next().unwrap_or(middle),
        _ => middle,
    };
    (!variant.is_empty()).then(|| variant.to_string())
}

/// Reject artifact names that could escape the stage directory
fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(Error::InvalidInput(format!(
            "Invalid artifact name: {}",
            name
        )));
    }
    Ok(())
}

/// Write bytes to a temp file in the target directory, then rename over the
/// final path. Rename within one directory is atomic on POSIX filesystems.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("No parent dir for {}", path.display())))?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
    ));
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Error::storage(path.display().to_string(), e));
    }
    Ok(())
}

fn remove_file_into(path: &Path, report: &mut DeleteReport) {
    match fs::remove_file(path) {
        Ok(()) => report.deleted.push(path.display().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => report
            .warnings
            .push(format!("{}: {}", path.display(), e)),
    }
}

/// Depth-first removal collecting per-path outcomes
fn remove_tree_into(root: &Path, report: &mut DeleteReport) {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.warnings.push(format!("{}: {}", root.display(), e));
                continue;
            }
        };
        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => {
                // Directory nodes are bookkeeping, only files count as
                // deleted artifacts.
                if !entry.file_type().is_dir() {
                    report.deleted.push(path.display().to_string());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.warnings.push(format!("{}: {}", path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            ..Config::default()
        };
        let store = ArtifactStore::open(&config).unwrap();
        (dir, store)
    }

    fn record(file_id: FileId) -> UploadRecord {
        UploadRecord {
            file_id,
            original_filename: "Test - Song.mp3".to_string(),
            sanitized_filename: "Test_-_Song.mp3".to_string(),
            title: "Song".to_string(),
            artist: "Test".to_string(),
            size_bytes: 128,
            extension: "mp3".to_string(),
            upload_time: Utc::now(),
            content_fingerprint: "test - song.mp3".to_string(),
            duration_seconds: None,
        }
    }

    #[test]
    fn pattern_matcher_handles_wildcards() {
        assert!(pattern_matches("vocals.*", "vocals.mp3"));
        assert!(pattern_matches("vocals.*", "vocals.wav"));
        assert!(!pattern_matches("vocals.*", "no_vocals.mp3"));
        assert!(pattern_matches("transcription_*.txt", "transcription_base.txt"));
        assert!(!pattern_matches("transcription_*.txt", "transcription_base.json"));
        assert!(pattern_matches("analysis_*.json", "analysis_gemma_describe.json"));
        assert!(!pattern_matches("analysis_*.json", "pitch_analysis_librosa.json"));
        assert!(pattern_matches("exact.txt", "exact.txt"));
        assert!(!pattern_matches("exact.txt", "inexact.txt"));
    }

    #[test]
    fn metadata_round_trips() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        store.write_metadata(file_id, &record(file_id)).unwrap();

        let loaded = store.read_metadata(file_id).unwrap().unwrap();
        assert_eq!(loaded.file_id, file_id);
        assert_eq!(loaded.title, "Song");

        assert!(store.read_metadata(FileId::new()).unwrap().is_none());
    }

    #[test]
    fn upload_write_is_atomic_and_discoverable() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        store.write_metadata(file_id, &record(file_id)).unwrap();
        let path = store.write_upload(file_id, b"audio-bytes", "mp3").unwrap();

        assert!(path.exists());
        assert_eq!(store.find_upload(file_id).unwrap().unwrap(), path);
        // No temp file left behind
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn separation_needs_both_markers() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();

        store
            .write_stage_file(file_id, StageKind::Separation, "vocals.mp3", b"v")
            .unwrap();
        assert!(!store.stage_complete(file_id, StageKind::Separation));

        store
            .write_stage_file(file_id, StageKind::Separation, "no_vocals.mp3", b"nv")
            .unwrap();
        assert!(store.stage_complete(file_id, StageKind::Separation));
    }

    #[test]
    fn stage_output_rehydrates_transcription_text() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        store
            .write_stage_file(
                file_id,
                StageKind::Transcription,
                "transcription_base.txt",
                b"line one\nline two",
            )
            .unwrap();

        let output = store
            .read_stage_output(file_id, StageKind::Transcription)
            .unwrap()
            .unwrap();
        assert_eq!(output.variant, "base");
        assert_eq!(
            output.result.get("text").and_then(|v| v.as_str()),
            Some("line one\nline two")
        );
    }

    #[test]
    fn karaoke_marker_lives_in_its_own_subtree() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        let name = format!("{}_karaoke.lrc", file_id);
        store
            .write_stage_file(file_id, StageKind::Karaoke, &name, b"[00:00.00] la")
            .unwrap();

        assert!(store.stage_complete(file_id, StageKind::Karaoke));
        assert!(store
            .resolve_artifact(file_id, StageKind::Karaoke, &name)
            .unwrap()
            .is_some());
        // Not visible from the regular output dir
        assert!(store
            .resolve_artifact(file_id, StageKind::Separation, &name)
            .unwrap()
            .is_none());
    }

    #[test]
    fn cleanup_only_touches_matching_files() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        store.write_metadata(file_id, &record(file_id)).unwrap();
        store
            .write_stage_file(file_id, StageKind::Separation, "vocals.mp3", b"v")
            .unwrap();
        store
            .write_stage_file(
                file_id,
                StageKind::Transcription,
                "transcription_base.txt",
                b"t",
            )
            .unwrap();

        store.cleanup_stage(
            file_id,
            StageKind::Separation,
            &stage_patterns(StageKind::Separation, file_id),
        );

        assert!(!store.stage_complete(file_id, StageKind::Separation));
        assert!(store.stage_complete(file_id, StageKind::Transcription));
        assert!(store.read_metadata(file_id).unwrap().is_some());
    }

    #[test]
    fn delete_sweeps_all_subtrees_and_is_idempotent() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        store.write_metadata(file_id, &record(file_id)).unwrap();
        store.write_upload(file_id, b"bytes", "mp3").unwrap();
        store
            .write_stage_file(file_id, StageKind::Separation, "vocals.mp3", b"v")
            .unwrap();
        let lrc = format!("{}_karaoke.lrc", file_id);
        store
            .write_stage_file(file_id, StageKind::Karaoke, &lrc, b"[00:00.00] la")
            .unwrap();

        let report = store.delete_file(file_id);
        assert!(report.warnings.is_empty());
        assert!(report.deleted.len() >= 4);
        assert!(store.read_metadata(file_id).unwrap().is_none());
        assert!(store.find_upload(file_id).unwrap().is_none());
        assert!(!store.stage_complete(file_id, StageKind::Karaoke));

        // Second sweep finds nothing
        let again = store.delete_file(file_id);
        assert!(again.is_empty());
    }

    #[test]
    fn iter_all_uploads_skips_karaoke_subtree_and_corrupt_entries() {
        let (_tmp, store) = test_store();
        let a = FileId::new();
        let b = FileId::new();
        store.write_metadata(a, &record(a)).unwrap();
        store.write_metadata(b, &record(b)).unwrap();

        // Corrupt third entry
        let c = FileId::new();
        let dir = store.output_dir.join(c.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("metadata.json"), b"{not json").unwrap();

        let records = store.iter_all_uploads().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn artifact_names_cannot_traverse() {
        let (_tmp, store) = test_store();
        let file_id = FileId::new();
        assert!(store
            .resolve_artifact(file_id, StageKind::Separation, "../metadata.json")
            .is_err());
        assert!(store
            .resolve_artifact(file_id, StageKind::Separation, "a/b.txt")
            .is_err());
        assert!(store
            .write_stage_file(file_id, StageKind::Separation, ".hidden", b"x")
            .is_err());
    }
}
