//! Drives a job from `pending` files to a terminal status.
//!
//! The store is the only coordination point: files are claimed with a
//! conditional transition, dispatched to the worker pool and recorded as
//! outcomes arrive. Anything left `processing` when a run starts or is
//! cancelled goes back to `pending`.

pub mod batch;
pub mod cancel;
pub mod progress;
pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;

pub use batch::AdaptiveBatch;
pub use cancel::CancellationToken;
pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use session::{prepare_job, PreparedJob};

use crate::config::{ProcessingSettings, RunConfig, WorkerModeKind};
use crate::db::file_repo::{self, CompletedFile};
use crate::db::{job_repo, Database, JobStatus, StatusCounts};
use crate::error::{DocsweepError, Result, WorkerError};
use crate::processor::AnalysisProcessor;
use crate::resources::{
    recommended_workers, HostResources, MemoryMonitor, SystemMemoryMonitor,
    DEFAULT_WORKER_MEMORY_BUDGET,
};
use crate::worker::{FileTask, PoolConfig, TaskOutcome, WorkerCommand, WorkerMode, WorkerPool};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_id: i64,
    pub status: JobStatus,
    pub workers: usize,
    /// Stalled files returned to `pending` at startup.
    pub recovered: usize,
    pub completed: usize,
    pub errors: usize,
    pub elapsed_secs: f64,
    pub files_per_second: f64,
    pub counts: StatusCounts,
}

/// Why the claim loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Drained,
    Capped,
    Cancelled,
}

#[derive(Debug, Default)]
struct RunTally {
    completed: usize,
    errors: usize,
    dispatched: usize,
}

impl RunTally {
    fn finished(&self) -> usize {
        self.completed + self.errors
    }
}

/// Builds the worker mode a run configuration asks for.
pub fn worker_mode_for(config: &RunConfig) -> Result<WorkerMode> {
    let services = config.services();
    match config.worker_mode {
        WorkerModeKind::Process => Ok(WorkerMode::Process(WorkerCommand::for_services(
            config.worker_program.clone(),
            &services,
        )?)),
        WorkerModeKind::InProcess => Ok(WorkerMode::InProcess(Arc::new(
            AnalysisProcessor::from_services(&services)?,
        ))),
    }
}

pub struct Orchestrator {
    db: Database,
    config: RunConfig,
    mode: WorkerMode,
    workers: usize,
    memory: Arc<dyn MemoryMonitor>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Worker count comes from `config.workers`, or from host resources
    /// when unset.
    pub fn new(db: Database, config: RunConfig, mode: WorkerMode) -> Self {
        let workers = config.workers.unwrap_or_else(|| {
            let host = HostResources::detect();
            let workers = recommended_workers(&host, DEFAULT_WORKER_MEMORY_BUDGET);
            info!(
                "Using {} workers ({} cores, {} MiB available)",
                workers,
                host.logical_cpus,
                host.available_memory / (1024 * 1024)
            );
            workers
        });

        Self {
            db,
            config,
            mode,
            workers,
            memory: Arc::new(SystemMemoryMonitor::new()),
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_memory_monitor(mut self, memory: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pool size: never more workers than files in one batch.
    pub fn worker_count(&self) -> usize {
        self.workers.min(self.config.batch_size).max(1)
    }

    /// Processes the job's pending files until none remain, the
    /// `max_files` cap is reached or the run is cancelled.
    ///
    /// A store failure stops the run, marks the job `error` and is
    /// returned; files it left `processing` are recovered by the next run.
    pub fn run(&self, job_id: i64) -> Result<RunSummary> {
        let job = job_repo::get_job(&self.db, job_id)?.ok_or(DocsweepError::JobNotFound(job_id))?;
        let settings = self.job_settings(job.settings.as_deref());
        let _span = tracing::info_span!("orchestrator.run", job_id).entered();
        let started = Instant::now();

        let recovered = file_repo::reset_stalled(&self.db, job_id)?;
        job_repo::update_status(&self.db, job_id, JobStatus::Running)?;

        let workers = self.worker_count();
        let pool = match WorkerPool::new(PoolConfig {
            worker_count: workers,
            mode: self.mode.clone(),
            settings,
            file_timeout: Duration::from_secs(self.config.file_timeout_secs),
        }) {
            Ok(pool) => pool,
            Err(e) => {
                self.fail_job(job_id);
                return Err(e.into());
            }
        };

        let pending = file_repo::status_counts(&self.db, job_id)?.pending;
        self.progress.report(ProgressEvent::Started {
            job_id,
            pending,
            workers,
        });

        let mut tally = RunTally::default();
        let exit = self.drive(&pool, job_id, &mut tally, started);

        let status = match exit {
            Ok(LoopExit::Drained) => {
                pool.shutdown();
                pool.wait();
                JobStatus::Completed
            }
            Ok(LoopExit::Capped) => {
                pool.shutdown();
                pool.wait();
                if file_repo::status_counts(&self.db, job_id)?.pending > 0 {
                    JobStatus::Interrupted
                } else {
                    JobStatus::Completed
                }
            }
            Ok(LoopExit::Cancelled) => {
                pool.abort();
                pool.wait();
                let reset = file_repo::reset_stalled(&self.db, job_id)?;
                info!("Run cancelled; {} unfinished files returned to pending", reset);
                JobStatus::Interrupted
            }
            Err(e) => {
                error!("Run of job {} aborted: {}", job_id, e);
                pool.abort();
                pool.wait();
                self.fail_job(job_id);
                return Err(e);
            }
        };

        job_repo::update_status(&self.db, job_id, status)?;
        self.progress.report(ProgressEvent::Finished { job_id, status });

        let elapsed = started.elapsed().as_secs_f64();
        let summary = RunSummary {
            job_id,
            status,
            workers,
            recovered,
            completed: tally.completed,
            errors: tally.errors,
            elapsed_secs: elapsed,
            files_per_second: rate(tally.finished(), elapsed),
            counts: file_repo::status_counts(&self.db, job_id)?,
        };
        info!(
            "Job {} {}: {} completed, {} errors in {:.2}s ({:.2} files/sec)",
            job_id,
            status,
            summary.completed,
            summary.errors,
            elapsed,
            summary.files_per_second
        );
        Ok(summary)
    }

    fn job_settings(&self, stored: Option<&str>) -> ProcessingSettings {
        match stored.map(serde_json::from_str::<ProcessingSettings>) {
            Some(Ok(settings)) => settings,
            Some(Err(e)) => {
                warn!("Ignoring unreadable job settings: {}", e);
                self.config.settings.clone()
            }
            None => self.config.settings.clone(),
        }
    }

    fn fail_job(&self, job_id: i64) {
        if let Err(e) = job_repo::update_status(&self.db, job_id, JobStatus::Error) {
            error!("Could not mark job {} as failed: {}", job_id, e);
        }
    }

    fn drive(
        &self,
        pool: &WorkerPool,
        job_id: i64,
        tally: &mut RunTally,
        started: Instant,
    ) -> Result<LoopExit> {
        let mut batch = AdaptiveBatch::new(
            self.config.batch_size,
            self.config.min_batch_size,
            self.config.memory_pressure_percent,
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            let limit = match self.config.max_files {
                Some(max) if tally.dispatched >= max => return Ok(LoopExit::Capped),
                Some(max) => batch.current().min(max - tally.dispatched),
                None => batch.current(),
            };

            let claimed = file_repo::claim_batch(&self.db, job_id, limit)?;
            if claimed.is_empty() {
                return Ok(LoopExit::Drained);
            }

            let mut in_flight: HashMap<i64, PathBuf> = HashMap::with_capacity(claimed.len());
            for file in claimed {
                if !file_repo::mark_processing(&self.db, file.id)? {
                    debug!("File {} was claimed by another run", file.id);
                    continue;
                }
                let path = PathBuf::from(&file.path);
                pool.submit(FileTask {
                    file_id: file.id,
                    job_id,
                    path: path.clone(),
                })?;
                in_flight.insert(file.id, path);
            }
            tally.dispatched += in_flight.len();
            debug!("Dispatched batch of {} files", in_flight.len());

            if !self.collect(pool, job_id, &mut in_flight, tally, started)? {
                return Ok(LoopExit::Cancelled);
            }

            batch.adjust(self.memory.usage_percent());
        }
    }

    /// Records outcomes until the batch is done. Returns `false` when
    /// cancellation cut the wait short.
    fn collect(
        &self,
        pool: &WorkerPool,
        job_id: i64,
        in_flight: &mut HashMap<i64, PathBuf>,
        tally: &mut RunTally,
        started: Instant,
    ) -> Result<bool> {
        let mut grace_deadline: Option<Instant> = None;

        while !in_flight.is_empty() {
            if grace_deadline.is_none() && self.cancel.is_cancelled() {
                info!(
                    "Cancellation requested, waiting up to {}s for {} in-flight files",
                    self.config.shutdown_grace_secs,
                    in_flight.len()
                );
                pool.shutdown();
                grace_deadline =
                    Some(Instant::now() + Duration::from_secs(self.config.shutdown_grace_secs));
            }
            if let Some(deadline) = grace_deadline {
                if Instant::now() >= deadline {
                    warn!("Grace period over with {} files unfinished", in_flight.len());
                    return Ok(false);
                }
            }

            let outcome = match pool.recv_result_timeout(POLL_INTERVAL) {
                Ok(Some(outcome)) => outcome,
                Ok(None) => continue,
                // Workers stop once shut down; whatever they did not start stays in flight.
                Err(WorkerError::ChannelClosed) if grace_deadline.is_some() => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            let Some(path) = in_flight.remove(&outcome.file_id) else {
                warn!("Ignoring outcome for unknown file {}", outcome.file_id);
                continue;
            };
            self.record(job_id, path, outcome, tally)?;

            let interval = self.config.throughput_log_interval;
            if interval > 0 && tally.finished() % interval == 0 {
                let files_per_second = rate(tally.finished(), started.elapsed().as_secs_f64());
                info!(
                    "Processed {} files in {:.2}s ({:.2} files/sec)",
                    tally.finished(),
                    started.elapsed().as_secs_f64(),
                    files_per_second
                );
                self.progress.report(ProgressEvent::Throughput {
                    job_id,
                    finished: tally.finished(),
                    files_per_second,
                });
            }
        }

        Ok(grace_deadline.is_none())
    }

    fn record(
        &self,
        job_id: i64,
        path: PathBuf,
        outcome: TaskOutcome,
        tally: &mut RunTally,
    ) -> Result<()> {
        let entity_count = outcome.entities.len();
        let error = if outcome.success {
            let completed = CompletedFile {
                duration_secs: outcome.duration_secs,
                entities: outcome.entities,
                metadata: Some(Value::Object(outcome.metadata)),
            };
            if file_repo::mark_completed(&self.db, outcome.file_id, job_id, &completed)? {
                tally.completed += 1;
            } else {
                warn!("File {} was no longer processing; result dropped", outcome.file_id);
            }
            None
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "Unknown error".to_string());
            if file_repo::mark_error(&self.db, outcome.file_id, job_id, &message)? {
                tally.errors += 1;
            } else {
                warn!("File {} was no longer processing; error dropped", outcome.file_id);
            }
            Some(message)
        };

        self.progress.report(ProgressEvent::FileFinished {
            job_id,
            file_id: outcome.file_id,
            path: path.to_string_lossy().into_owned(),
            success: error.is_none(),
            entity_count,
            error,
            finished: tally.finished(),
        });
        Ok(())
    }
}

fn rate(count: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    }
}
