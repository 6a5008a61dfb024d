use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProcessingSettings;
use crate::detection::DetectedEntity;
use crate::processor::{Analysis, FileProcessor};

/// One file handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTask {
    pub file_id: i64,
    pub job_id: i64,
    pub path: PathBuf,
}

/// What a worker reports back for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub file_id: i64,
    pub success: bool,
    #[serde(default)]
    pub entities: Vec<DetectedEntity>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl TaskOutcome {
    pub fn success(file_id: i64, analysis: Analysis, duration_secs: f64) -> Self {
        Self {
            file_id,
            success: true,
            entities: analysis.entities,
            metadata: analysis.metadata,
            error: None,
            duration_secs,
        }
    }

    pub fn failure(file_id: i64, error: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            file_id,
            success: false,
            entities: Vec::new(),
            metadata: Map::new(),
            error: Some(error.into()),
            duration_secs,
        }
    }
}

/// Runs one task to a [`TaskOutcome`]. Errors and panics in the processor
/// become failed outcomes.
pub fn run_task(
    processor: &dyn FileProcessor,
    task: &FileTask,
    settings: &ProcessingSettings,
) -> TaskOutcome {
    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| processor.process(&task.path, settings)));
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(Ok(analysis)) => TaskOutcome::success(task.file_id, analysis, elapsed),
        Ok(Err(e)) => TaskOutcome::failure(task.file_id, e.to_string(), elapsed),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Processor panicked on file {}: {}", task.file_id, message);
            TaskOutcome::failure(
                task.file_id,
                format!("Processor panicked: {}", message),
                elapsed,
            )
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
