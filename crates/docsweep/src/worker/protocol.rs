//! Wire format between the pool and worker processes: one JSON object per
//! line. Requests go to the worker's stdin, outcomes come back on stdout.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::task::FileTask;
use crate::config::ProcessingSettings;
use crate::error::WorkerError;

/// Environment variable carrying the worker's `ServiceConfig` as JSON.
pub const WORKER_CONFIG_ENV: &str = "DOCSWEEP_WORKER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub task: FileTask,
    pub settings: ProcessingSettings,
}

pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), WorkerError> {
    let mut line =
        serde_json::to_vec(message).map_err(|e| WorkerError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .and_then(|_| writer.flush())
        .map_err(|e| WorkerError::Protocol(e.to_string()))
}

/// Reads the next message, skipping blank lines. `Ok(None)` at end of input.
pub fn read_message<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, WorkerError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| WorkerError::Protocol(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(line.trim())
            .map(Some)
            .map_err(|e| WorkerError::Protocol(format!("invalid message: {}", e)));
    }
}
