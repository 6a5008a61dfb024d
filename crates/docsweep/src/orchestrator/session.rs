use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::config::RunConfig;
use crate::db::job_repo::{self, NewJob};
use crate::db::{file_repo, Database, DatabaseError, JobStatus};
use crate::error::{Result, WorkerError};
use crate::worker::{DirectoryScanner, ScanSummary};

/// Metadata key holding the scanned directory of a job.
pub const DIRECTORY_KEY: &str = "directory";

#[derive(Debug, Clone, Serialize)]
pub struct PreparedJob {
    pub job_id: i64,
    /// An existing job for the directory was reused.
    pub resumed: bool,
    /// Files returned to `pending` while preparing.
    pub reset_files: usize,
    pub scan: ScanSummary,
}

/// Picks the job a run over `directory` works on and registers the
/// directory's files with it.
///
/// With `resume` the newest job for the directory is reused and its
/// stalled files reset; with `force_restart` that job is cleared back to
/// all-pending. Otherwise a new job is created. The directory is always
/// rescanned, so files added since the last run are picked up.
pub fn prepare_job(db: &Database, directory: &Path, config: &RunConfig) -> Result<PreparedJob> {
    let directory = directory
        .canonicalize()
        .map_err(|_| WorkerError::DirectoryNotFound(directory.to_path_buf()))?;
    let key = directory.to_string_lossy().into_owned();

    let existing = if config.resume || config.force_restart {
        job_repo::find_jobs_by_metadata(db, DIRECTORY_KEY, &key)?
            .into_iter()
            .next()
    } else {
        None
    };

    let (job_id, resumed, reset_files) = match existing {
        Some(job) if config.force_restart => {
            let reset = file_repo::clear_job(db, job.id)?.unwrap_or(0);
            job_repo::update_status(db, job.id, JobStatus::Created)?;
            info!("Restarting job {}: {} files reset", job.id, reset);
            (job.id, true, reset)
        }
        Some(job) => {
            let reset = file_repo::reset_stalled(db, job.id)?;
            info!(
                "Resuming job {} ({} of {} files done)",
                job.id,
                job.processed_files + job.error_files,
                job.total_files
            );
            (job.id, true, reset)
        }
        None => {
            let job_id = job_repo::create_job(db, &new_job(&directory, config)?)?;
            info!("Created job {} for {}", job_id, directory.display());
            (job_id, false, 0)
        }
    };

    let scanner = DirectoryScanner::new(&directory, &config.extensions);
    let scan = scanner.register(db, job_id)?;

    Ok(PreparedJob {
        job_id,
        resumed,
        reset_files,
        scan,
    })
}

fn new_job(directory: &Path, config: &RunConfig) -> Result<NewJob> {
    let settings = serde_json::to_string(&config.settings).map_err(DatabaseError::from)?;
    let name = directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| directory.to_string_lossy().into_owned());

    let mut metadata = BTreeMap::new();
    metadata.insert(
        DIRECTORY_KEY.to_string(),
        directory.to_string_lossy().into_owned(),
    );
    metadata.insert("extensions".to_string(), config.extensions.join(","));

    Ok(NewJob {
        name: format!("Document scan - {}", name),
        settings: Some(settings),
        metadata,
    })
}
