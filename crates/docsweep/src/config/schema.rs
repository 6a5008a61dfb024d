use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration of a scanning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Defaults to `~/.docsweep/data/docsweep.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Worker count; derived from host resources when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default = "default_file_timeout")]
    pub file_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_memory_pressure")]
    pub memory_pressure_percent: f64,
    #[serde(default = "default_throughput_interval")]
    pub throughput_log_interval: usize,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub force_restart: bool,
    #[serde(default)]
    pub worker_mode: WorkerModeKind,
    /// Program spawned for worker processes; the running binary by default.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    #[serde(default)]
    pub settings: ProcessingSettings,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
}

pub(crate) fn default_extensions() -> Vec<String> {
    [
        ".txt", ".pdf", ".docx", ".doc", ".rtf", ".xlsx", ".xls", ".csv", ".tsv", ".pptx",
        ".ppt", ".json", ".xml", ".html", ".htm", ".eml", ".msg", ".md", ".markdown",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_batch_size() -> usize {
    10
}

fn default_min_batch_size() -> usize {
    2
}

fn default_file_timeout() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_memory_pressure() -> f64 {
    85.0
}

fn default_throughput_interval() -> usize {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            extensions: default_extensions(),
            workers: None,
            batch_size: default_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_files: None,
            file_timeout_secs: default_file_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            memory_pressure_percent: default_memory_pressure(),
            throughput_log_interval: default_throughput_interval(),
            resume: false,
            force_restart: false,
            worker_mode: WorkerModeKind::default(),
            worker_program: None,
            settings: ProcessingSettings::default(),
            extraction: ExtractionConfig::default(),
            detection: DetectionConfig::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::Validation { message });

        if !(0.0..=1.0).contains(&self.settings.threshold) {
            return fail(format!(
                "threshold must be between 0 and 1, got {}",
                self.settings.threshold
            ));
        }
        if self.batch_size == 0 || self.min_batch_size == 0 {
            return fail("batch sizes must be at least 1".to_string());
        }
        if self.min_batch_size > self.batch_size {
            return fail(format!(
                "min_batch_size ({}) exceeds batch_size ({})",
                self.min_batch_size, self.batch_size
            ));
        }
        if self.file_timeout_secs == 0 {
            return fail("file_timeout_secs must be greater than 0".to_string());
        }
        if self.workers == Some(0) {
            return fail("workers must be at least 1 when set".to_string());
        }
        if self.extraction.endpoints.is_empty() {
            return fail("at least one extraction endpoint is required".to_string());
        }
        if !(self.memory_pressure_percent > 0.0 && self.memory_pressure_percent <= 100.0) {
            return fail(format!(
                "memory_pressure_percent must be in (0, 100], got {}",
                self.memory_pressure_percent
            ));
        }
        if self.settings.ocr_dpi == 0 {
            return fail("ocr_dpi must be greater than 0".to_string());
        }
        Ok(())
    }

    /// The part of the configuration a worker process needs.
    pub fn services(&self) -> ServiceConfig {
        ServiceConfig {
            extraction: self.extraction.clone(),
            detection: self.detection.clone(),
            recognition: self.recognition.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerModeKind {
    /// Each worker is a child process.
    #[default]
    Process,
    /// Workers run on threads of the orchestrator process.
    InProcess,
}

/// Per-job processing parameters. Stored with the job and sent to every
/// worker with each task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub force_ocr: bool,
    #[serde(default = "default_dpi")]
    pub ocr_dpi: u32,
    /// 0 picks the thread count from host resources.
    #[serde(default)]
    pub ocr_threads: usize,
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Entity types to detect; all supported types when unset.
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_threshold() -> f64 {
    0.7
}

fn default_dpi() -> u32 {
    300
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            force_ocr: false,
            ocr_dpi: default_dpi(),
            ocr_threads: 0,
            max_pages: None,
            entities: None,
            max_file_size: None,
            language: default_language(),
        }
    }
}

/// Settings for the worker side: the backends it talks to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

pub(crate) fn default_endpoints() -> Vec<String> {
    vec![
        "http://localhost:9998".to_string(),
        "http://localhost:9999".to_string(),
        "http://localhost:10000".to_string(),
    ]
}

fn default_health_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            health_check_interval_secs: default_health_interval(),
            request_timeout_secs: default_request_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detection_timeout")]
    pub timeout_secs: u64,
}

fn default_detection_endpoint() -> String {
    "http://localhost:5002".to_string()
}

fn default_detection_timeout() -> u64 {
    60
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detection_endpoint(),
            timeout_secs: default_detection_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_per_thread_memory")]
    pub per_thread_memory_mb: u64,
    #[serde(default = "default_large_item_threshold")]
    pub large_item_threshold_mb: u64,
    #[serde(default = "default_many_units_threshold")]
    pub many_units_threshold: usize,
    /// Path of the tesseract binary.
    #[serde(default = "default_tesseract")]
    pub tesseract_program: PathBuf,
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_per_thread_memory() -> u64 {
    1024
}

fn default_large_item_threshold() -> u64 {
    20
}

fn default_many_units_threshold() -> usize {
    20
}

fn default_tesseract() -> PathBuf {
    PathBuf::from("tesseract")
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            per_thread_memory_mb: default_per_thread_memory(),
            large_item_threshold_mb: default_large_item_threshold(),
            many_units_threshold: default_many_units_threshold(),
            tesseract_program: default_tesseract(),
        }
    }
}
