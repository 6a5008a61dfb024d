//! docsweep command-line interface.
//!
//! Results and reports are printed to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;

use docsweep::config::{default_config, load_config, RunConfig, ServiceConfig, WorkerModeKind};
use docsweep::db::{default_database_path, file_repo, job_repo, result_repo, Database, JobRecord};
use docsweep::orchestrator::{prepare_job, worker_mode_for, LogProgress};
use docsweep::worker::protocol::WORKER_CONFIG_ENV;
use docsweep::{AnalysisProcessor, CancellationToken, DocsweepError, Orchestrator};

#[derive(Parser)]
#[command(name = "docsweep")]
#[command(about = "Resumable batch scanning of document shares for sensitive data", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Job database; overrides the configured path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and process every supported file
    Run {
        directory: PathBuf,

        /// Continue the newest job for this directory
        #[arg(long)]
        resume: bool,

        /// Reset the newest job for this directory and start over
        #[arg(long, conflicts_with = "resume")]
        force_restart: bool,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after dispatching this many files
        #[arg(long)]
        max_files: Option<usize>,

        /// Run workers on threads instead of child processes
        #[arg(long)]
        in_process: bool,

        /// Run OCR on every file, skipping text extraction
        #[arg(long)]
        force_ocr: bool,
    },
    /// Serve tasks on stdin/stdout (started by `run`)
    #[command(hide = true)]
    Worker,
    /// Progress of a job (the newest one by default)
    Status {
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// List all jobs
    Jobs,
    /// Write a job's results as JSON
    Export {
        #[arg(long, short)]
        output: PathBuf,

        #[arg(long)]
        job_id: Option<i64>,

        /// Leave detected entities out of the export
        #[arg(long)]
        no_entities: bool,
    },
    /// Per-type statistics of a job
    Stats {
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// Return files stuck in `processing` to `pending`
    ResetStalled {
        #[arg(long)]
        job_id: i64,
    },
    /// Return failed files to `pending` for another attempt
    RetryErrors {
        #[arg(long)]
        job_id: i64,
    },
    /// Drop a job's results and return all its files to `pending`
    Clear {
        #[arg(long)]
        job_id: i64,
    },
    /// Drop all results of every job
    ResetAll {
        /// Required; this cannot be undone
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Docsweep(#[from] DocsweepError),

    #[error("No job database location; pass --database")]
    NoDatabasePath,

    #[error("No jobs in the database")]
    NoJobs,

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {name}: {message}")]
    Environment { name: &'static str, message: String },

    #[error("Refusing to reset all jobs without --yes")]
    NotConfirmed,
}

impl From<docsweep::DatabaseError> for CliError {
    fn from(e: docsweep::DatabaseError) -> Self {
        CliError::Docsweep(e.into())
    }
}

impl From<docsweep::ConfigError> for CliError {
    fn from(e: docsweep::ConfigError) -> Self {
        CliError::Docsweep(e.into())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = docsweep::logging::init_logging(cli.verbose, cli.log_json) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Command::Worker => {
            run_worker()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            directory,
            resume,
            force_restart,
            workers,
            batch_size,
            max_files,
            in_process,
            force_ocr,
        } => {
            let mut config = load_run_config(cli.config.as_deref())?;
            config.resume |= resume;
            config.force_restart |= force_restart;
            if workers.is_some() {
                config.workers = workers;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
                config.min_batch_size = config.min_batch_size.min(batch_size);
            }
            if max_files.is_some() {
                config.max_files = max_files;
            }
            if in_process {
                config.worker_mode = WorkerModeKind::InProcess;
            }
            config.settings.force_ocr |= force_ocr;
            config.validate()?;

            let db = open_database(cli.database.as_deref(), &config)?;
            run_directory(db, &directory, config)
        }
        command => {
            let config = load_run_config(cli.config.as_deref())?;
            let db = open_database(cli.database.as_deref(), &config)?;
            manage(&db, command)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_directory(db: Database, directory: &Path, config: RunConfig) -> Result<ExitCode, CliError> {
    let prepared = prepare_job(&db, directory, &config)?;
    info!(
        "Job {}: {} files found, {} newly registered",
        prepared.job_id, prepared.scan.matched, prepared.scan.registered
    );

    let cancel = CancellationToken::new();
    if let Err(e) = cancel.install_ctrlc_handler() {
        warn!("Could not install interrupt handler: {}", e);
    }

    let mode = worker_mode_for(&config)?;
    let orchestrator = Orchestrator::new(db, config, mode)
        .with_progress(Arc::new(LogProgress))
        .with_cancellation(cancel);
    let summary = orchestrator.run(prepared.job_id)?;

    print_json(&summary)?;
    Ok(if summary.errors > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_worker() -> Result<(), CliError> {
    let services = match std::env::var(WORKER_CONFIG_ENV) {
        Ok(raw) => serde_json::from_str::<ServiceConfig>(&raw).map_err(|e| {
            CliError::Environment {
                name: WORKER_CONFIG_ENV,
                message: e.to_string(),
            }
        })?,
        Err(_) => default_config()?.services(),
    };
    // The orchestrator ends a worker by closing its stdin.
    if let Err(e) = ctrlc::set_handler(|| log::debug!("Worker ignoring interrupt")) {
        log::warn!("Could not install worker interrupt handler: {}", e);
    }
    let processor = AnalysisProcessor::from_services(&services).map_err(DocsweepError::from)?;
    let served = docsweep::worker::serve_stdio(&processor).map_err(DocsweepError::from)?;
    log::debug!("Worker exiting after {} tasks", served);
    Ok(())
}

fn manage(db: &Database, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status { job_id } => {
            let job = resolve_job(db, job_id)?;
            let estimate = result_repo::estimate_completion(db, job.id)?
                .ok_or(DocsweepError::JobNotFound(job.id))?;
            let counts = file_repo::status_counts(db, job.id)?;
            print_json(&serde_json::json!({
                "job_id": job.id,
                "name": job.name,
                "progress": estimate,
                "files": counts,
            }))
        }
        Command::Jobs => print_json(&job_repo::list_jobs(db)?),
        Command::Export {
            output,
            job_id,
            no_entities,
        } => {
            let job = resolve_job(db, job_id)?;
            let export = result_repo::export_results(db, job.id, !no_entities)?
                .ok_or(DocsweepError::JobNotFound(job.id))?;
            let body = serde_json::to_string_pretty(&export)
                .map_err(|e| CliError::Docsweep(docsweep::DatabaseError::from(e).into()))?;
            std::fs::write(&output, body).map_err(|e| CliError::Write {
                path: output.clone(),
                source: e,
            })?;
            info!(
                "Exported {} files of job {} to {}",
                export.results.len(),
                job.id,
                output.display()
            );
            Ok(())
        }
        Command::Stats { job_id } => {
            let job = resolve_job(db, job_id)?;
            let stats = result_repo::job_statistics(db, job.id)?
                .ok_or(DocsweepError::JobNotFound(job.id))?;
            print_json(&stats)
        }
        Command::ResetStalled { job_id } => {
            require_job(db, job_id)?;
            let reset = file_repo::reset_stalled(db, job_id)?;
            print_json(&serde_json::json!({ "job_id": job_id, "reset": reset }))
        }
        Command::RetryErrors { job_id } => {
            require_job(db, job_id)?;
            let reset = file_repo::retry_errors(db, job_id)?;
            print_json(&serde_json::json!({ "job_id": job_id, "reset": reset }))
        }
        Command::Clear { job_id } => {
            let reset = file_repo::clear_job(db, job_id)?.ok_or(DocsweepError::JobNotFound(job_id))?;
            print_json(&serde_json::json!({ "job_id": job_id, "reset": reset }))
        }
        Command::ResetAll { yes } => {
            if !yes {
                return Err(CliError::NotConfirmed);
            }
            let reset = file_repo::reset_all(db)?;
            print_json(&serde_json::json!({ "reset": reset }))
        }
        Command::Run { .. } | Command::Worker => Ok(()),
    }
}

fn load_run_config(path: Option<&Path>) -> Result<RunConfig, CliError> {
    Ok(match path {
        Some(path) => load_config(path)?,
        None => default_config()?,
    })
}

fn open_database(explicit: Option<&Path>, config: &RunConfig) -> Result<Database, CliError> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| config.database_path.clone())
        .or_else(default_database_path)
        .ok_or(CliError::NoDatabasePath)?;
    log::debug!("Using job database {}", path.display());
    Ok(Database::open(&path)?)
}

fn resolve_job(db: &Database, job_id: Option<i64>) -> Result<JobRecord, CliError> {
    match job_id {
        Some(id) => require_job(db, id),
        None => job_repo::latest_job(db)?.ok_or(CliError::NoJobs),
    }
}

fn require_job(db: &Database, job_id: i64) -> Result<JobRecord, CliError> {
    Ok(job_repo::get_job(db, job_id)?.ok_or(DocsweepError::JobNotFound(job_id))?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Docsweep(docsweep::DatabaseError::from(e).into()))?;
    println!("{}", body);
    Ok(())
}
