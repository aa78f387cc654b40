//! Common error types for kproc

use thiserror::Error;

/// Common result type for kproc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the server and its components
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem failure attributed to a specific artifact path
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("GPU required but unavailable")]
    GpuRequired,

    #[error("Processor failed: {0}")]
    Processor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Attribute an IO error to the path it occurred on
    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}
