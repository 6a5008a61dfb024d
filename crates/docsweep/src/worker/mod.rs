pub mod pool;
pub mod process;
pub mod protocol;
pub mod scanner;
pub mod task;

use std::io::{BufRead, Write};

pub use pool::{PoolConfig, WorkerMode, WorkerPool};
pub use process::WorkerCommand;
pub use scanner::{DirectoryScanner, ScanSummary};
pub use task::{run_task, FileTask, TaskOutcome};

use crate::error::WorkerError;
use crate::processor::FileProcessor;
use protocol::{read_message, write_message, Request};

/// Worker-process main loop over stdin/stdout. Returns when stdin closes.
pub fn serve_stdio(processor: &dyn FileProcessor) -> Result<usize, WorkerError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(processor, stdin.lock(), stdout.lock())
}

/// Answers each request read from `reader` with one outcome line on
/// `writer`. Returns the number of tasks served.
pub fn serve<R: BufRead, W: Write>(
    processor: &dyn FileProcessor,
    mut reader: R,
    mut writer: W,
) -> Result<usize, WorkerError> {
    let mut served = 0;
    while let Some(request) = read_message::<_, Request>(&mut reader)? {
        let outcome = run_task(processor, &request.task, &request.settings);
        write_message(&mut writer, &outcome)?;
        served += 1;
    }
    log::debug!("Worker input closed after {} tasks", served);
    Ok(served)
}
