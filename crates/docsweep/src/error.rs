use std::path::PathBuf;
use thiserror::Error;

use crate::balancer::BalancerError;

#[derive(Error, Debug)]
pub enum DocsweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job {0} not found")]
    JobNotFound(i64),
}

impl DocsweepError {
    /// Whether retrying the failed operation may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            DocsweepError::Database(e) => e.is_retryable(),
            DocsweepError::Worker(WorkerError::ChannelClosed) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },
}

/// Failures of a single file's processing. These never abort a batch; the
/// orchestrator records them against the file and moves on.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Extraction backend failed: {0}")]
    Backend(#[from] BalancerError),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Worker process exited: {0}")]
    Crashed(String),

    #[error("Aborted during shutdown")]
    Aborted,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, DocsweepError>;
