//! Builders and fakes for driving runs without extraction or detection
//! backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use docsweep::config::{ProcessingSettings, RunConfig, WorkerModeKind};
use docsweep::detection::DetectedEntity;
use docsweep::resources::MemoryMonitor;
use docsweep::{Analysis, CancellationToken, FileProcessor, ProcessError, WorkerMode};

/// Processor that finds one email address per file, fails on files whose
/// name is listed, and records how often it saw each path.
#[derive(Default)]
pub struct ScriptedProcessor {
    failing: Vec<String>,
    delay: Duration,
    cancel_after: Option<(usize, CancellationToken)>,
    calls: Mutex<HashMap<PathBuf, usize>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.failing.push(file_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancels `token` once this many files have been started.
    pub fn cancelling_after(mut self, started: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((started, token));
        self
    }

    pub fn into_mode(self: Arc<Self>) -> WorkerMode {
        WorkerMode::InProcess(self)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Largest number of times any single path was processed.
    pub fn max_calls_per_path(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

impl FileProcessor for ScriptedProcessor {
    fn process(
        &self,
        path: &Path,
        _settings: &ProcessingSettings,
    ) -> Result<Analysis, ProcessError> {
        let started = {
            let mut calls = self.calls.lock().unwrap();
            *calls.entry(path.to_path_buf()).or_insert(0) += 1;
            calls.values().sum::<usize>()
        };
        if let Some((after, token)) = &self.cancel_after {
            if started >= *after {
                token.cancel();
            }
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(ProcessError::PdfProcessing(format!(
                "corrupt document: {}",
                name
            )));
        }

        let mut analysis = Analysis::default();
        analysis.entities.push(DetectedEntity {
            entity_type: "EMAIL_ADDRESS".to_string(),
            text: "jane@example.com".to_string(),
            start: 9,
            end: 25,
            score: 0.95,
        });
        analysis
            .metadata
            .insert("extraction_method".to_string(), json!("scripted"));
        Ok(analysis)
    }
}

/// Memory monitor that never reports pressure.
pub struct CalmMemory;

impl MemoryMonitor for CalmMemory {
    fn usage_percent(&self) -> f64 {
        25.0
    }
}

/// Builder for `RunConfig` instances suited to in-process test runs.
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig {
                workers: Some(2),
                batch_size: 5,
                min_batch_size: 1,
                worker_mode: WorkerModeKind::InProcess,
                file_timeout_secs: 30,
                shutdown_grace_secs: 10,
                ..Default::default()
            },
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = Some(workers);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self.config.min_batch_size = self.config.min_batch_size.min(batch_size);
        self
    }

    pub fn max_files(mut self, max_files: usize) -> Self {
        self.config.max_files = Some(max_files);
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.config.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn resume(mut self) -> Self {
        self.config.resume = true;
        self
    }

    pub fn force_restart(mut self) -> Self {
        self.config.force_restart = true;
        self
    }

    pub fn build(self) -> RunConfig {
        self.config
    }
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
