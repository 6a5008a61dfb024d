//! Whole runs through the orchestrator with in-process workers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CalmMemory, RunConfigBuilder, ScriptedProcessor, TestHarness};
use docsweep::db::file_repo;
use docsweep::db::{job_repo, result_repo, FileStatus, JobStatus};
use docsweep::orchestrator::prepare_job;
use docsweep::{CancellationToken, Orchestrator};

#[test]
fn test_ten_files_with_one_failure() {
    let harness = TestHarness::new();
    harness.write_text_files(10);
    let db = harness.open_db();
    let config = RunConfigBuilder::new().workers(2).batch_size(5).build();

    let prepared = prepare_job(&db, &harness.input_dir, &config).unwrap();
    assert_eq!(prepared.scan.registered, 10);

    let processor = Arc::new(ScriptedProcessor::new().failing_on("file_07.txt"));
    let summary = Orchestrator::new(db.clone(), config, Arc::clone(&processor).into_mode())
        .with_memory_monitor(Arc::new(CalmMemory))
        .run(prepared.job_id)
        .unwrap();

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.workers, 2);
    assert_eq!(summary.completed, 9);
    assert_eq!(summary.errors, 1);
    assert_eq!(processor.total_calls(), 10);

    let job = job_repo::get_job(&db, prepared.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_files, 10);
    assert_eq!(job.processed_files, 9);
    assert_eq!(job.error_files, 1);

    let failed = file_repo::list_files(&db, prepared.job_id, Some(FileStatus::Error)).unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].path.ends_with("file_07.txt"));
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("corrupt document"));

    let export = result_repo::export_results(&db, prepared.job_id, true)
        .unwrap()
        .unwrap();
    assert_eq!(export.results.len(), 10);
    let entities: usize = export.results.iter().map(|r| r.entities.len()).sum();
    assert_eq!(entities, 9);
}

#[test]
fn test_interrupted_job_finishes_without_duplicates() {
    let harness = TestHarness::new();
    let db = harness.open_db();
    let job_id = TestHarness::seed_job(&db, 10);

    // A crashed run left three files mid-flight.
    let claimed = file_repo::claim_batch(&db, job_id, 3).unwrap();
    for file in &claimed {
        assert!(file_repo::mark_processing(&db, file.id).unwrap());
    }
    job_repo::update_status(&db, job_id, JobStatus::Running).unwrap();
    let counts = file_repo::status_counts(&db, job_id).unwrap();
    assert_eq!((counts.processing, counts.pending), (3, 7));

    let processor = Arc::new(ScriptedProcessor::new());
    let summary = Orchestrator::new(
        harness.open_db(),
        RunConfigBuilder::new().build(),
        Arc::clone(&processor).into_mode(),
    )
    .with_memory_monitor(Arc::new(CalmMemory))
    .run(job_id)
    .unwrap();

    assert_eq!(summary.recovered, 3);
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.counts.completed, 10);
    assert_eq!(processor.max_calls_per_path(), 1);
    assert!(TestHarness::result_rows_per_file(&db, job_id)
        .iter()
        .all(|&rows| rows == 1));
}

#[test]
fn test_capped_run_resumes_where_it_stopped() {
    let harness = TestHarness::new();
    harness.write_text_files(10);
    let db = harness.open_db();
    let processor = Arc::new(ScriptedProcessor::new());

    let first_config = RunConfigBuilder::new().max_files(4).build();
    let first = prepare_job(&db, &harness.input_dir, &first_config).unwrap();
    let summary = Orchestrator::new(db.clone(), first_config, Arc::clone(&processor).into_mode())
        .with_memory_monitor(Arc::new(CalmMemory))
        .run(first.job_id)
        .unwrap();
    assert_eq!(summary.status, JobStatus::Interrupted);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.counts.pending, 6);

    let resume_config = RunConfigBuilder::new().resume().build();
    let resumed = prepare_job(&db, &harness.input_dir, &resume_config).unwrap();
    assert_eq!(resumed.job_id, first.job_id);
    assert!(resumed.resumed);
    assert_eq!(resumed.scan.registered, 0);

    let summary = Orchestrator::new(db.clone(), resume_config, Arc::clone(&processor).into_mode())
        .with_memory_monitor(Arc::new(CalmMemory))
        .run(resumed.job_id)
        .unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.completed, 6);
    assert_eq!(processor.total_calls(), 10);
    assert_eq!(processor.max_calls_per_path(), 1);
}

#[test]
fn test_cancelled_run_leaves_nothing_processing() {
    let harness = TestHarness::new();
    let db = harness.open_db();
    let job_id = TestHarness::seed_job(&db, 10);

    let cancel = CancellationToken::new();
    let processor = Arc::new(
        ScriptedProcessor::new()
            .with_delay(Duration::from_millis(20))
            .cancelling_after(3, cancel.clone()),
    );
    let summary = Orchestrator::new(
        db.clone(),
        RunConfigBuilder::new().build(),
        Arc::clone(&processor).into_mode(),
    )
    .with_memory_monitor(Arc::new(CalmMemory))
    .with_cancellation(cancel)
    .run(job_id)
    .unwrap();

    assert_eq!(summary.status, JobStatus::Interrupted);
    assert_eq!(summary.counts.processing, 0);
    assert!(summary.counts.pending > 0);
    assert_eq!(summary.counts.completed + summary.counts.pending, 10);

    let summary = Orchestrator::new(
        db.clone(),
        RunConfigBuilder::new().build(),
        Arc::new(ScriptedProcessor::new()).into_mode(),
    )
    .with_memory_monitor(Arc::new(CalmMemory))
    .run(job_id)
    .unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.counts.completed, 10);
    assert!(TestHarness::result_rows_per_file(&db, job_id)
        .iter()
        .all(|&rows| rows == 1));
}

#[test]
fn test_force_restart_reprocesses_everything() {
    let harness = TestHarness::new();
    harness.write_text_files(3);
    let db = harness.open_db();

    let config = RunConfigBuilder::new().build();
    let prepared = prepare_job(&db, &harness.input_dir, &config).unwrap();
    Orchestrator::new(db.clone(), config, Arc::new(ScriptedProcessor::new()).into_mode())
        .with_memory_monitor(Arc::new(CalmMemory))
        .run(prepared.job_id)
        .unwrap();

    let restart = RunConfigBuilder::new().force_restart().build();
    let again = prepare_job(&db, &harness.input_dir, &restart).unwrap();
    assert_eq!(again.job_id, prepared.job_id);
    assert_eq!(again.reset_files, 3);

    let processor = Arc::new(ScriptedProcessor::new());
    let summary = Orchestrator::new(db.clone(), restart, Arc::clone(&processor).into_mode())
        .with_memory_monitor(Arc::new(CalmMemory))
        .run(again.job_id)
        .unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(processor.total_calls(), 3);

    let job = job_repo::get_job(&db, again.job_id).unwrap().unwrap();
    assert_eq!(job.processed_files, 3);
    assert_eq!(job.error_files, 0);
}
