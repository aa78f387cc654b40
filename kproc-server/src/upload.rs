//! Upload pipeline
//!
//! Validates an incoming file, detects duplicates, materializes the source
//! and its `metadata.json` in the artifact store, and probes the track
//! duration. The fingerprint scan and the record write run under one async
//! mutex, so two concurrent uploads of the same fingerprint can never both
//! land.

use crate::config::Config;
use crate::store::ArtifactStore;
use chrono::Utc;
use kproc_common::naming;
use kproc_common::{FileId, UploadRecord};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upload rejection reasons; the facade maps each onto its HTTP status
#[derive(Debug, Error)]
pub enum UploadError {
    /// A record with the same fingerprint already exists (409)
    #[error("Song already exists")]
    Duplicate { file_id: FileId },

    /// Extension missing or not in the allowed set (415)
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    /// File exceeds the configured size limit (413)
    #[error("File too large: {size} bytes (limit {max})")]
    TooLarge { size: u64, max: u64 },

    #[error(transparent)]
    Common(#[from] kproc_common::Error),
}

/// One validated multipart upload, as extracted by the facade
#[derive(Debug)]
pub struct UploadRequest {
    pub original_filename: String,
    pub bytes: Vec<u8>,
    /// Explicit form fields win over the filename heuristic
    pub title: Option<String>,
    pub artist: Option<String>,
}

pub struct UploadPipeline {
    store: Arc<ArtifactStore>,
    config: Arc<Config>,
    /// Serializes fingerprint scan + record write
    dedup_lock: tokio::sync::Mutex<()>,
}

impl UploadPipeline {
    pub fn new(store: Arc<ArtifactStore>, config: Arc<Config>) -> Self {
        UploadPipeline {
            store,
            config,
            dedup_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ingest one upload; on success the record is fully persisted
    pub async fn ingest(&self, request: UploadRequest) -> Result<UploadRecord, UploadError> {
        let (stem, extension) = naming::split_extension(&request.original_filename);
        let extension = extension
            .filter(|e| self.config.extension_allowed(e))
            .ok_or_else(|| UploadError::UnsupportedExtension(request.original_filename.clone()))?;

        let size = request.bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(UploadError::TooLarge {
                size,
                max: self.config.max_upload_bytes,
            });
        }

        let fingerprint = naming::fingerprint(&request.original_filename);

        // Everything from the duplicate scan to the metadata write happens
        // under the lock; concurrent duplicates serialize here.
        let _guard = self.dedup_lock.lock().await;

        for existing in self.store.iter_all_uploads()? {
            if existing.content_fingerprint == fingerprint {
                info!(
                    file_id = %existing.file_id,
                    fingerprint = %fingerprint,
                    "Duplicate upload rejected"
                );
                return Err(UploadError::Duplicate {
                    file_id: existing.file_id,
                });
            }
        }

        let file_id = FileId::new();
        let (parsed_title, parsed_artist) = naming::parse_title_artist(stem);
        let title = clean_field(request.title).unwrap_or(parsed_title);
        let artist = clean_field(request.artist).unwrap_or(parsed_artist);

        let path = self.store.write_upload(file_id, &request.bytes, &extension)?;
        let duration_seconds = probe_duration(&path).await;

        let record = UploadRecord {
            file_id,
            original_filename: request.original_filename.clone(),
            sanitized_filename: naming::sanitize_filename(&request.original_filename),
            title,
            artist,
            size_bytes: size,
            extension: extension.clone(),
            upload_time: Utc::now(),
            content_fingerprint: fingerprint,
            duration_seconds,
        };

        if let Err(e) = self.store.write_metadata(file_id, &record) {
            // Keep the invariant: no source file without a metadata record.
            warn!(file_id = %file_id, error = %e, "Metadata write failed, rolling back upload");
            self.store.remove_upload(file_id, &extension);
            return Err(UploadError::Common(e));
        }

        info!(
            file_id = %file_id,
            title = %record.title,
            artist = %record.artist,
            size = size,
            "Upload ingested"
        );
        Ok(record)
    }
}

fn clean_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| naming::collapse_whitespace(&v))
        .filter(|v| !v.is_empty())
}

/// Probe the track length; failures only cost the karaoke timing fallback
async fn probe_duration(path: &Path) -> Option<f64> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        use lofty::file::AudioFile;
        lofty::read_from_path(&path)
            .map(|tagged| tagged.properties().duration().as_secs_f64())
            .ok()
    })
    .await;

    match result {
        Ok(Some(secs)) if secs > 0.0 => {
            debug!(duration = secs, "Probed track duration");
            Some(secs)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Duration probe task failed");
            None
        }
    }
}
