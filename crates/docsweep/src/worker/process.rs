//! Isolated worker processes.
//!
//! Each child runs `docsweep worker` (or a configured program) and speaks
//! the line protocol in [`super::protocol`]. A child that misses its
//! deadline or dies is killed and replaced by the owning slot.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};

use super::protocol::{write_message, Request, WORKER_CONFIG_ENV};
use super::task::TaskOutcome;
use crate::config::ServiceConfig;
use crate::error::WorkerError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `<program> worker`, defaulting to the running executable, with the
    /// backend configuration passed through the environment.
    pub fn for_services(
        program: Option<PathBuf>,
        services: &ServiceConfig,
    ) -> Result<Self, WorkerError> {
        let program = match program {
            Some(program) => program,
            None => std::env::current_exe().map_err(|e| {
                WorkerError::SpawnFailed(format!("cannot locate current executable: {}", e))
            })?,
        };
        let config = serde_json::to_string(services)
            .map_err(|e| WorkerError::SpawnFailed(format!("cannot encode config: {}", e)))?;
        Ok(Self::new(program).arg("worker").env(WORKER_CONFIG_ENV, config))
    }
}

pub(crate) struct ChildWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
}

impl ChildWorker {
    /// Children get their own process group, so a terminal Ctrl-C reaches
    /// only the orchestrator, which then shuts them down itself.
    pub(crate) fn spawn(command: &WorkerCommand) -> Result<Self, WorkerError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::SpawnFailed(format!("{}: {}", command.program.display(), e))
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorkerError::SpawnFailed(
                    "worker pipes were not captured".to_string(),
                ));
            }
        };

        let (line_tx, lines) = crossbeam_channel::unbounded();
        let reader = thread::Builder::new()
            .name(format!("docsweep-worker-io-{}", child.id()))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WorkerError::SpawnFailed(e.to_string()));
        }

        debug!("Spawned worker process {}", child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
            lines,
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.child.id()
    }

    /// Sends one request and waits for its outcome until `timeout` passes
    /// or `abort` is raised. Any error leaves the child unusable.
    pub(crate) fn execute(
        &mut self,
        request: &Request,
        timeout: Duration,
        abort: &AtomicBool,
    ) -> Result<TaskOutcome, WorkerError> {
        let stdin = self.stdin.as_mut().ok_or(WorkerError::ChannelClosed)?;
        write_message(stdin, request)
            .map_err(|e| WorkerError::Crashed(format!("cannot send task: {}", e)))?;

        let deadline = Instant::now() + timeout;
        loop {
            if abort.load(Ordering::SeqCst) {
                return Err(WorkerError::Aborted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WorkerError::Timeout {
                    secs: timeout.as_secs(),
                });
            }

            match self.lines.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(line) => match serde_json::from_str::<TaskOutcome>(&line) {
                    Ok(outcome) if outcome.file_id == request.task.file_id => return Ok(outcome),
                    Ok(outcome) => {
                        return Err(WorkerError::Protocol(format!(
                            "expected outcome for file {}, got file {}",
                            request.task.file_id, outcome.file_id
                        )))
                    }
                    Err(_) => debug!("Ignoring non-protocol worker output: {}", line.trim()),
                },
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WorkerError::Crashed(self.exit_status()))
                }
            }
        }
    }

    fn exit_status(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            Ok(None) => "output closed".to_string(),
            Err(e) => e.to_string(),
        }
    }

    pub(crate) fn kill(mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Kill of worker {} failed: {}", self.child.id(), e);
        }
        let _ = self.child.wait();
    }

    /// Closes stdin so the child exits on its own; kills it after `grace`.
    pub(crate) fn close(mut self, grace: Duration) {
        drop(self.stdin.take());
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }
        warn!("Worker {} did not exit after closing stdin, killing", self.id());
        self.kill();
    }
}

impl Drop for ChildWorker {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ProcessingSettings;
    use crate::worker::task::FileTask;

    /// Answers every request with a successful outcome for its file id.
    const ECHO_WORKER: &str = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"file_id":([0-9]+).*/\1/')
  printf 'starting\n{"file_id":%s,"success":true,"duration_secs":0.01}\n' "$id"
done"#;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh").arg("-c").arg(script)
    }

    fn request(file_id: i64) -> Request {
        Request {
            task: FileTask {
                file_id,
                job_id: 1,
                path: PathBuf::from("/tmp/a.txt"),
            },
            settings: ProcessingSettings::default(),
        }
    }

    #[test]
    fn test_child_answers_requests_in_turn() {
        let abort = AtomicBool::new(false);
        let mut worker = ChildWorker::spawn(&shell(ECHO_WORKER)).unwrap();
        for id in [4, 9] {
            let outcome = worker
                .execute(&request(id), Duration::from_secs(10), &abort)
                .unwrap();
            assert_eq!(outcome.file_id, id);
            assert!(outcome.success);
        }
        worker.close(Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_expiry() {
        let abort = AtomicBool::new(false);
        let mut worker = ChildWorker::spawn(&shell("read line; exec sleep 30")).unwrap();
        let started = Instant::now();
        let result = worker.execute(&request(1), Duration::from_millis(300), &abort);
        assert!(matches!(result, Err(WorkerError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        worker.kill();
    }

    #[test]
    fn test_child_exit_is_a_crash() {
        let abort = AtomicBool::new(false);
        let mut worker = ChildWorker::spawn(&shell("read line; exit 3")).unwrap();
        let result = worker.execute(&request(1), Duration::from_secs(10), &abort);
        assert!(matches!(result, Err(WorkerError::Crashed(_))));
    }

    #[test]
    fn test_abort_interrupts_the_wait() {
        let abort = AtomicBool::new(true);
        let mut worker = ChildWorker::spawn(&shell("read line; exec sleep 30")).unwrap();
        let result = worker.execute(&request(1), Duration::from_secs(30), &abort);
        assert!(matches!(result, Err(WorkerError::Aborted)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_child_leads_its_own_process_group() {
        let worker = ChildWorker::spawn(&shell("read line")).unwrap();
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", worker.id())).unwrap();
        // Fields after the command name: state, ppid, pgrp.
        let after_comm = &stat[stat.rfind(')').unwrap() + 1..];
        let pgrp: u32 = after_comm.split_whitespace().nth(2).unwrap().parse().unwrap();
        assert_eq!(pgrp, worker.id());
        worker.close(Duration::from_secs(2));
    }

    #[test]
    fn test_missing_program() {
        let result = ChildWorker::spawn(&WorkerCommand::new("/nonexistent/docsweep"));
        assert!(matches!(result, Err(WorkerError::SpawnFailed(_))));
    }

    #[test]
    fn test_for_services_passes_config() {
        let command = WorkerCommand::for_services(
            Some(PathBuf::from("/usr/bin/docsweep")),
            &ServiceConfig::default(),
        )
        .unwrap();
        assert_eq!(command.args, vec!["worker".to_string()]);
        assert_eq!(command.env[0].0, WORKER_CONFIG_ENV);
        let parsed: ServiceConfig = serde_json::from_str(&command.env[0].1).unwrap();
        assert_eq!(parsed.extraction.endpoints.len(), 3);
    }
}
