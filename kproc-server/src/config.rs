//! Configuration resolution for kproc-server
//!
//! Every setting resolves CLI argument → environment variable → TOML config
//! file → compiled default. The TOML tier is optional: if no config file is
//! named and `./kproc.toml` does not exist, that tier is skipped.

use clap::Parser;
use kproc_common::config::{env_parsed, env_var, load_toml_config, parse_list, TomlConfig};
use kproc_common::{Error, Result, StageKind};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Command-line flags for the server binary
#[derive(Debug, Parser, Default)]
#[command(name = "kproc-server", about = "AI audio processing backend")]
pub struct Cli {
    /// HTTP listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for uploaded source files
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for stage output artifacts
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use stub processors and skip GPU checks
    #[arg(long)]
    pub ci_smoke_mode: bool,

    /// Include exception details in error responses
    #[arg(long)]
    pub debug: bool,
}

/// Fully resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub karaoke_subdir: String,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub port: u16,
    pub cors_origins: String,
    pub ci_smoke_mode: bool,
    pub debug: bool,
    /// Model names run in order after an upload with auto_process
    pub auto_process_chain: Vec<String>,
    pub progress_queue_size: usize,
    pub gpu_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./outputs"),
            karaoke_subdir: "Karaoke-pjesme".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            allowed_extensions: ["mp3", "wav", "flac", "m4a", "ogg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            port: 5000,
            cors_origins: "*".to_string(),
            ci_smoke_mode: false,
            debug: false,
            auto_process_chain: ["separation", "transcription", "karaoke"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            progress_queue_size: 32,
            gpu_concurrency: 1,
        }
    }
}

impl Config {
    /// Resolve configuration from CLI flags, environment, and TOML file
    pub fn resolve(cli: &Cli) -> Result<Config> {
        let toml = load_toml_tier(cli)?;
        let defaults = Config::default();

        let allowed_extensions = env_var("KPROC_ALLOWED_EXTENSIONS")
            .map(|raw| parse_list(&raw))
            .or_else(|| toml.allowed_extensions.clone())
            .unwrap_or(defaults.allowed_extensions)
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect::<Vec<_>>();
        if allowed_extensions.is_empty() {
            return Err(Error::Config(
                "allowed_extensions must not be empty".to_string(),
            ));
        }

        let auto_process_chain = env_var("KPROC_AUTO_PROCESS_CHAIN")
            .map(|raw| parse_list(&raw))
            .or_else(|| toml.auto_process_chain.clone())
            .unwrap_or(defaults.auto_process_chain);

        let config = Config {
            upload_dir: cli
                .upload_dir
                .clone()
                .or_else(|| env_var("KPROC_UPLOAD_DIR").map(PathBuf::from))
                .or_else(|| toml.upload_dir.clone())
                .unwrap_or(defaults.upload_dir),
            output_dir: cli
                .output_dir
                .clone()
                .or_else(|| env_var("KPROC_OUTPUT_DIR").map(PathBuf::from))
                .or_else(|| toml.output_dir.clone())
                .unwrap_or(defaults.output_dir),
            karaoke_subdir: env_var("KPROC_KARAOKE_SUBDIR")
                .or_else(|| toml.karaoke_subdir.clone())
                .unwrap_or(defaults.karaoke_subdir),
            max_upload_bytes: env_parsed::<u64>("KPROC_MAX_UPLOAD_BYTES")?
                .or(toml.max_upload_bytes)
                .unwrap_or(defaults.max_upload_bytes),
            allowed_extensions,
            port: cli
                .port
                .or(env_parsed::<u16>("KPROC_PORT")?)
                .or(toml.port)
                .unwrap_or(defaults.port),
            cors_origins: env_var("KPROC_CORS_ORIGINS")
                .or_else(|| toml.cors_origins.clone())
                .unwrap_or(defaults.cors_origins),
            ci_smoke_mode: cli.ci_smoke_mode
                || env_parsed::<bool>("KPROC_CI_SMOKE_MODE")?
                    .or(toml.ci_smoke_mode)
                    .unwrap_or(defaults.ci_smoke_mode),
            debug: cli.debug
                || env_parsed::<bool>("KPROC_DEBUG")?
                    .or(toml.debug)
                    .unwrap_or(defaults.debug),
            auto_process_chain,
            progress_queue_size: env_parsed::<usize>("KPROC_PROGRESS_QUEUE_SIZE")?
                .or(toml.progress_queue_size)
                .unwrap_or(defaults.progress_queue_size)
                .max(1),
            gpu_concurrency: env_parsed::<usize>("KPROC_GPU_CONCURRENCY")?
                .or(toml.gpu_concurrency)
                .unwrap_or(defaults.gpu_concurrency)
                .max(1),
        };

        // Chain entries must at least name known stages; a typo here would
        // otherwise only surface on the first upload.
        for name in &config.auto_process_chain {
            if name.parse::<StageKind>().is_err() {
                warn!(model = %name, "auto_process_chain names an unknown stage");
            }
        }

        Ok(config)
    }

    /// Directory holding karaoke stage outputs
    pub fn karaoke_dir(&self) -> PathBuf {
        self.output_dir.join(&self.karaoke_subdir)
    }

    pub fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == ext)
    }
}

/// Load the TOML tier: explicit path (CLI or env) must parse; the implicit
/// `./kproc.toml` is only used when present.
fn load_toml_tier(cli: &Cli) -> Result<TomlConfig> {
    if let Some(path) = cli
        .config
        .clone()
        .or_else(|| env_var("KPROC_CONFIG").map(PathBuf::from))
    {
        return load_toml_config(&path);
    }
    let implicit = Path::new("./kproc.toml");
    if implicit.exists() {
        return load_toml_config(implicit);
    }
    Ok(TomlConfig::default())
}
