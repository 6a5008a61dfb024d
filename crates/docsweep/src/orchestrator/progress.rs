use crate::db::JobStatus;

/// Events emitted by the orchestrator while a job runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        job_id: i64,
        pending: i64,
        workers: usize,
    },
    FileFinished {
        job_id: i64,
        file_id: i64,
        path: String,
        success: bool,
        entity_count: usize,
        error: Option<String>,
        /// Files finished in this run so far.
        finished: usize,
    },
    Throughput {
        job_id: i64,
        finished: usize,
        files_per_second: f64,
    },
    Finished {
        job_id: i64,
        status: JobStatus,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes events to the log.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                job_id,
                pending,
                workers,
            } => log::info!(
                "Job {}: {} files pending, {} workers",
                job_id,
                pending,
                workers
            ),
            ProgressEvent::FileFinished {
                file_id,
                path,
                success: true,
                entity_count,
                ..
            } => log::debug!(
                "File {} ({}) done: {} entities",
                file_id,
                crate::sanitize::redact_path(std::path::Path::new(&path)),
                entity_count
            ),
            ProgressEvent::FileFinished {
                file_id,
                path,
                error,
                ..
            } => log::warn!(
                "File {} ({}) failed: {}",
                file_id,
                crate::sanitize::redact_path(std::path::Path::new(&path)),
                error.as_deref().unwrap_or("unknown error")
            ),
            // The orchestrator logs throughput itself.
            ProgressEvent::Throughput { .. } => {}
            ProgressEvent::Finished { job_id, status } => {
                log::info!("Job {} finished with status {}", job_id, status)
            }
        }
    }
}
