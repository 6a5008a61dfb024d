use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::process::{ChildWorker, WorkerCommand};
use super::protocol::Request;
use super::task::{run_task, FileTask, TaskOutcome};
use crate::config::ProcessingSettings;
use crate::error::WorkerError;
use crate::processor::FileProcessor;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Where tasks run.
#[derive(Clone)]
pub enum WorkerMode {
    /// One long-lived child process per worker.
    Process(WorkerCommand),
    /// A helper thread per task inside this process.
    InProcess(Arc<dyn FileProcessor>),
}

pub struct PoolConfig {
    pub worker_count: usize,
    pub mode: WorkerMode,
    pub settings: ProcessingSettings,
    /// Hard deadline per file.
    pub file_timeout: Duration,
}

/// Fixed set of supervisor threads pulling [`FileTask`]s from a shared
/// queue. Every submitted task yields exactly one [`TaskOutcome`] unless
/// the pool is aborted first.
pub struct WorkerPool {
    task_sender: Sender<FileTask>,
    result_receiver: Receiver<TaskOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, WorkerError> {
        if config.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (task_sender, task_receiver) = unbounded::<FileTask>();
        let (result_sender, result_receiver) = unbounded::<TaskOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let abort = Arc::new(AtomicBool::new(false));
        let settings = Arc::new(config.settings);

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let supervisor = Supervisor {
                worker_id,
                tasks: task_receiver.clone(),
                results: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                abort: Arc::clone(&abort),
                settings: Arc::clone(&settings),
                file_timeout: config.file_timeout,
                slot: WorkerSlot::new(config.mode.clone()),
            };

            let handle = thread::Builder::new()
                .name(format!("docsweep-worker-{}", worker_id))
                .spawn(move || supervisor.run());
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    abort.store(true, Ordering::SeqCst);
                    shutdown.store(true, Ordering::SeqCst);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", config.worker_count);

        Ok(Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
            abort,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&self, task: FileTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.task_sender
            .send(task)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<TaskOutcome> {
        self.result_receiver.try_recv().ok()
    }

    /// Waits up to `timeout` for the next outcome. `Ok(None)` on timeout,
    /// `ChannelClosed` once every worker has exited.
    pub fn recv_result_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<TaskOutcome>, WorkerError> {
        match self.result_receiver.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::ChannelClosed),
        }
    }

    /// Stops taking new tasks; tasks already running finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops immediately: running tasks are abandoned and worker processes
    /// killed. Abandoned tasks report nothing.
    pub fn abort(&self) {
        warn!("Aborting worker pool");
        self.shutdown.store(true, Ordering::SeqCst);
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn wait(self) {
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Supervisor {
    worker_id: usize,
    tasks: Receiver<FileTask>,
    results: Sender<TaskOutcome>,
    shutdown: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    settings: Arc<ProcessingSettings>,
    file_timeout: Duration,
    slot: WorkerSlot,
}

impl Supervisor {
    fn run(mut self) {
        debug!("Worker {} started", self.worker_id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.worker_id);
                break;
            }

            match self.tasks.recv_timeout(POLL_INTERVAL) {
                Ok(task) => {
                    debug!("Worker {} processing file {}", self.worker_id, task.file_id);
                    let Some(outcome) = self.slot.execute(
                        &task,
                        &self.settings,
                        self.file_timeout,
                        &self.shutdown,
                        &self.abort,
                    ) else {
                        break;
                    };
                    if let Err(e) = self.results.send(outcome) {
                        error!("Worker {} failed to send result: {}", self.worker_id, e);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} task channel disconnected", self.worker_id);
                    break;
                }
            }
        }

        self.slot.close(self.abort.load(Ordering::SeqCst));
        debug!("Worker {} stopped", self.worker_id);
    }
}

/// Executes tasks for one supervisor with a hard deadline.
enum WorkerSlot {
    Process {
        command: WorkerCommand,
        child: Option<ChildWorker>,
    },
    InProcess(Arc<dyn FileProcessor>),
}

impl WorkerSlot {
    fn new(mode: WorkerMode) -> Self {
        match mode {
            WorkerMode::Process(command) => WorkerSlot::Process {
                command,
                child: None,
            },
            WorkerMode::InProcess(processor) => WorkerSlot::InProcess(processor),
        }
    }

    /// `None` when the pool was aborted mid-task, or when the worker died
    /// after shutdown began. Either way the file stays `processing` and the
    /// next stalled-file reset returns it to `pending`.
    fn execute(
        &mut self,
        task: &FileTask,
        settings: &Arc<ProcessingSettings>,
        timeout: Duration,
        shutdown: &AtomicBool,
        abort: &AtomicBool,
    ) -> Option<TaskOutcome> {
        let started = Instant::now();
        let result = match self {
            WorkerSlot::Process { command, child } => {
                execute_in_child(command, child, task, settings, timeout, abort)
            }
            WorkerSlot::InProcess(processor) => {
                execute_on_thread(processor, task, settings, timeout, abort)
            }
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(WorkerError::Aborted) => None,
            Err(WorkerError::Crashed(reason)) if shutdown.load(Ordering::SeqCst) => {
                info!(
                    "Worker died during shutdown with file {} unfinished ({}); leaving it for retry",
                    task.file_id, reason
                );
                None
            }
            Err(e) => {
                warn!("File {} failed in worker: {}", task.file_id, e);
                Some(TaskOutcome::failure(
                    task.file_id,
                    e.to_string(),
                    started.elapsed().as_secs_f64(),
                ))
            }
        }
    }

    fn close(self, aborted: bool) {
        if let WorkerSlot::Process {
            child: Some(child), ..
        } = self
        {
            if aborted {
                child.kill();
            } else {
                child.close(CHILD_EXIT_GRACE);
            }
        }
    }
}

fn execute_in_child(
    command: &WorkerCommand,
    slot: &mut Option<ChildWorker>,
    task: &FileTask,
    settings: &ProcessingSettings,
    timeout: Duration,
    abort: &AtomicBool,
) -> Result<TaskOutcome, WorkerError> {
    let mut child = match slot.take() {
        Some(child) => child,
        None => ChildWorker::spawn(command)?,
    };

    let request = Request {
        task: task.clone(),
        settings: settings.clone(),
    };
    match child.execute(&request, timeout, abort) {
        Ok(outcome) => {
            *slot = Some(child);
            Ok(outcome)
        }
        Err(e) => {
            // The child's state is unknown; the next task gets a fresh one.
            debug!("Discarding worker process {} after: {}", child.id(), e);
            child.kill();
            Err(e)
        }
    }
}

fn execute_on_thread(
    processor: &Arc<dyn FileProcessor>,
    task: &FileTask,
    settings: &Arc<ProcessingSettings>,
    timeout: Duration,
    abort: &AtomicBool,
) -> Result<TaskOutcome, WorkerError> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let processor = Arc::clone(processor);
    let settings = Arc::clone(settings);
    let helper_task = task.clone();

    thread::Builder::new()
        .name(format!("docsweep-task-{}", task.file_id))
        .spawn(move || {
            let outcome = run_task(processor.as_ref(), &helper_task, &settings);
            let _ = done_tx.send(outcome);
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    loop {
        if abort.load(Ordering::SeqCst) {
            return Err(WorkerError::Aborted);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // The helper thread cannot be stopped; its late result is dropped.
            return Err(WorkerError::Timeout {
                secs: timeout.as_secs(),
            });
        }
        match done_rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(outcome) => return Ok(outcome),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WorkerError::Crashed("task thread exited".to_string()))
            }
        }
    }
}
