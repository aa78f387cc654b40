//! Configuration file handling
//!
//! The server resolves each setting CLI argument → environment variable →
//! TOML config file → compiled default. This module owns the TOML tier.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional overrides loaded from a `kproc.toml` file
///
/// Every field is optional; absent fields fall through to the next
/// resolution tier. Unknown keys are rejected so typos surface at startup
/// instead of silently using defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TomlConfig {
    pub upload_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub karaoke_subdir: Option<String>,
    pub max_upload_bytes: Option<u64>,
    pub allowed_extensions: Option<Vec<String>>,
    pub port: Option<u16>,
    pub cors_origins: Option<String>,
    pub ci_smoke_mode: Option<bool>,
    pub debug: Option<bool>,
    pub auto_process_chain: Option<Vec<String>>,
    pub progress_queue_size: Option<usize>,
    pub gpu_concurrency: Option<usize>,
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Read an environment variable, treating empty values as unset
pub fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Parse a typed value out of an environment variable
///
/// Unparseable values are reported as configuration errors rather than
/// silently ignored.
pub fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, raw))),
    }
}

/// Split a comma-separated list, trimming and dropping empty entries
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
