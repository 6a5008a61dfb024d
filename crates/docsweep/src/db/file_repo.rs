//! File repository: registration, claiming and state transitions of the
//! `files` table, together with the result rows each terminal transition
//! writes.
//!
//! Every transition is a conditional update on the current status, so two
//! callers racing on one file cannot both win, and the job counters move in
//! the same transaction as the status they count.

use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::Value;

use super::job_repo::job_exists;
use super::models::{FileRecord, FileStatus, StatusCounts};
use super::{now_timestamp, Database, DatabaseError};
use crate::detection::DetectedEntity;

/// A file discovered by the scanner.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub size: i64,
    pub file_type: String,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyPresent,
    JobNotFound,
}

/// A pending file returned by [`claim_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub id: i64,
    pub path: String,
}

/// What a successful attempt produced.
#[derive(Debug, Clone, Default)]
pub struct CompletedFile {
    pub duration_secs: f64,
    pub entities: Vec<DetectedEntity>,
    pub metadata: Option<Value>,
}

fn insert_file(tx: &Transaction<'_>, job_id: i64, file: &NewFile) -> Result<bool, DatabaseError> {
    let inserted = tx.execute(
        "INSERT INTO files (job_id, path, size, file_type, modified_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(job_id, path) DO NOTHING",
        params![
            job_id,
            file.path,
            file.size,
            file.file_type,
            file.modified_at,
            FileStatus::Pending.as_str()
        ],
    )?;
    Ok(inserted == 1)
}

/// Registers one file as pending. Registering the same path twice for one
/// job is a no-op that leaves `total_files` untouched.
pub fn register_file(
    db: &Database,
    job_id: i64,
    file: &NewFile,
) -> Result<RegisterOutcome, DatabaseError> {
    db.with_tx(|tx| {
        if !job_exists(tx, job_id)? {
            return Ok(RegisterOutcome::JobNotFound);
        }
        if !insert_file(tx, job_id, file)? {
            return Ok(RegisterOutcome::AlreadyPresent);
        }
        tx.execute(
            "UPDATE jobs SET total_files = total_files + 1, updated_at = ?2 WHERE id = ?1",
            params![job_id, now_timestamp()],
        )?;
        Ok(RegisterOutcome::Registered)
    })
}

/// Registers many files in one transaction. Returns the number newly
/// registered, or `None` if the job does not exist.
pub fn register_files(
    db: &Database,
    job_id: i64,
    files: &[NewFile],
) -> Result<Option<usize>, DatabaseError> {
    db.with_tx(|tx| {
        if !job_exists(tx, job_id)? {
            return Ok(None);
        }
        let mut registered = 0usize;
        for file in files {
            if insert_file(tx, job_id, file)? {
                registered += 1;
            }
        }
        if registered > 0 {
            tx.execute(
                "UPDATE jobs SET total_files = total_files + ?2, updated_at = ?3 WHERE id = ?1",
                params![job_id, registered as i64, now_timestamp()],
            )?;
        }
        Ok(Some(registered))
    })
}

/// Lists up to `limit` pending files in registration order. Nothing is
/// reserved; callers must win [`mark_processing`] before dispatching.
pub fn claim_batch(
    db: &Database,
    job_id: i64,
    limit: usize,
) -> Result<Vec<PendingFile>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, path FROM files WHERE job_id = ?1 AND status = ?2 ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![job_id, FileStatus::Pending.as_str(), limit as i64],
                |r| {
                    Ok(PendingFile {
                        id: r.get(0)?,
                        path: r.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a file from `pending` to `processing`. Returns `true` only for the
/// caller whose update took effect.
pub fn mark_processing(db: &Database, file_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET status = ?2, process_start = ?3, process_end = NULL,
               error_message = NULL, attempts = attempts + 1
             WHERE id = ?1 AND status = ?4",
            params![
                file_id,
                FileStatus::Processing.as_str(),
                now_timestamp(),
                FileStatus::Pending.as_str()
            ],
        )?;
        Ok(changed == 1)
    })
}

fn finish(
    tx: &Transaction<'_>,
    file_id: i64,
    job_id: i64,
    status: FileStatus,
    error_message: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = tx.execute(
        "UPDATE files SET status = ?3, process_end = ?4, error_message = ?5
         WHERE id = ?1 AND job_id = ?2 AND status = ?6",
        params![
            file_id,
            job_id,
            status.as_str(),
            now_timestamp(),
            error_message,
            FileStatus::Processing.as_str()
        ],
    )?;
    Ok(changed == 1)
}

fn replace_result(
    tx: &Transaction<'_>,
    file_id: i64,
    duration_secs: f64,
    entities: &[DetectedEntity],
    metadata: Option<&Value>,
) -> Result<i64, DatabaseError> {
    // Entities cascade with their result.
    tx.execute("DELETE FROM results WHERE file_id = ?1", params![file_id])?;
    let metadata = metadata.map(serde_json::to_string).transpose()?;
    tx.execute(
        "INSERT INTO results (file_id, entity_count, processing_time, metadata)
         VALUES (?1, ?2, ?3, ?4)",
        params![file_id, entities.len() as i64, duration_secs, metadata],
    )?;
    let result_id = tx.last_insert_rowid();

    let mut stmt = tx.prepare(
        "INSERT INTO entities (result_id, entity_type, text, start_index, end_index, score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for entity in entities {
        stmt.execute(params![
            result_id,
            entity.entity_type,
            entity.text,
            entity.start as i64,
            entity.end as i64,
            entity.score
        ])?;
    }
    Ok(result_id)
}

/// Records a successful attempt: the file becomes `completed`, its result
/// and entities replace any earlier attempt's, and `processed_files` grows
/// by one. Returns `false` (changing nothing) unless the file belongs to
/// `job_id` and is currently `processing`.
pub fn mark_completed(
    db: &Database,
    file_id: i64,
    job_id: i64,
    completed: &CompletedFile,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        if !finish(tx, file_id, job_id, FileStatus::Completed, None)? {
            return Ok(false);
        }
        replace_result(
            tx,
            file_id,
            completed.duration_secs,
            &completed.entities,
            completed.metadata.as_ref(),
        )?;
        tx.execute(
            "UPDATE jobs SET processed_files = processed_files + 1, updated_at = ?2 WHERE id = ?1",
            params![job_id, now_timestamp()],
        )?;
        Ok(true)
    })
}

/// Records a failed attempt: the file becomes `error` with `message`, an
/// empty result carrying the error is stored, and `error_files` grows by
/// one. Same preconditions as [`mark_completed`].
pub fn mark_error(
    db: &Database,
    file_id: i64,
    job_id: i64,
    message: &str,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let started: Option<String> = tx
            .query_row(
                "SELECT process_start FROM files WHERE id = ?1",
                params![file_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        if !finish(tx, file_id, job_id, FileStatus::Error, Some(message))? {
            return Ok(false);
        }
        let duration_secs = started
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|start| {
                let elapsed = chrono::Utc::now().signed_duration_since(start);
                elapsed.num_milliseconds().max(0) as f64 / 1000.0
            })
            .unwrap_or(0.0);
        let metadata = serde_json::json!({ "error": message });
        replace_result(tx, file_id, duration_secs, &[], Some(&metadata))?;
        tx.execute(
            "UPDATE jobs SET error_files = error_files + 1, updated_at = ?2 WHERE id = ?1",
            params![job_id, now_timestamp()],
        )?;
        Ok(true)
    })
}

/// Returns every `processing` file of the job to `pending` and reports how
/// many moved. Counters are untouched since in-flight files are not counted.
pub fn reset_stalled(db: &Database, job_id: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET status = ?2, process_start = NULL
             WHERE job_id = ?1 AND status = ?3",
            params![
                job_id,
                FileStatus::Pending.as_str(),
                FileStatus::Processing.as_str()
            ],
        )?;
        if changed > 0 {
            log::info!("Reset {} stalled files of job {} to pending", changed, job_id);
        }
        Ok(changed)
    })
}

/// Returns every `error` file of the job to `pending` for another attempt
/// and takes them off `error_files`.
pub fn retry_errors(db: &Database, job_id: i64) -> Result<usize, DatabaseError> {
    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM results WHERE file_id IN
               (SELECT id FROM files WHERE job_id = ?1 AND status = ?2)",
            params![job_id, FileStatus::Error.as_str()],
        )?;
        let changed = tx.execute(
            "UPDATE files SET status = ?2, error_message = NULL, process_start = NULL,
               process_end = NULL
             WHERE job_id = ?1 AND status = ?3",
            params![
                job_id,
                FileStatus::Pending.as_str(),
                FileStatus::Error.as_str()
            ],
        )?;
        tx.execute(
            "UPDATE jobs SET error_files = MAX(error_files - ?2, 0), updated_at = ?3 WHERE id = ?1",
            params![job_id, changed as i64, now_timestamp()],
        )?;
        Ok(changed)
    })
}

/// Number of files of the job in each state.
pub fn status_counts(db: &Database, job_id: i64) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM files WHERE job_id = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status.parse::<FileStatus>()?, count);
        }
        Ok(counts)
    })
}

pub fn get_file(db: &Database, file_id: i64) -> Result<Option<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![file_id],
                FileRecord::from_row,
            )
            .optional()?)
    })
}

/// Files of a job in registration order, optionally restricted to one state.
pub fn list_files(
    db: &Database,
    job_id: i64,
    status: Option<FileStatus>,
) -> Result<Vec<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["job_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(job_id)];
        if let Some(status) = status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        let sql = format!(
            "SELECT * FROM files WHERE {} ORDER BY id",
            conditions.join(" AND ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), FileRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

const RESET_FILES_SQL: &str = "UPDATE files SET status = 'pending', error_message = NULL,
    process_start = NULL, process_end = NULL";

/// Returns every file of every job to `pending`, deletes all results and
/// zeroes the processed and error counters. Returns the number of files.
pub fn reset_all(db: &Database) -> Result<usize, DatabaseError> {
    db.with_tx(|tx| {
        tx.execute("DELETE FROM results", [])?;
        let changed = tx.execute(RESET_FILES_SQL, [])?;
        tx.execute(
            "UPDATE jobs SET processed_files = 0, error_files = 0, updated_at = ?1",
            params![now_timestamp()],
        )?;
        log::warn!("Reset all jobs: {} files returned to pending", changed);
        Ok(changed)
    })
}

/// Same as [`reset_all`] for one job. Returns `None` if the job does not
/// exist.
pub fn clear_job(db: &Database, job_id: i64) -> Result<Option<usize>, DatabaseError> {
    db.with_tx(|tx| {
        if !job_exists(tx, job_id)? {
            return Ok(None);
        }
        tx.execute(
            "DELETE FROM results WHERE file_id IN (SELECT id FROM files WHERE job_id = ?1)",
            params![job_id],
        )?;
        let changed = tx.execute(&format!("{} WHERE job_id = ?1", RESET_FILES_SQL), params![job_id])?;
        tx.execute(
            "UPDATE jobs SET processed_files = 0, error_files = 0, updated_at = ?2 WHERE id = ?1",
            params![job_id, now_timestamp()],
        )?;
        log::info!("Cleared job {}: {} files returned to pending", job_id, changed);
        Ok(Some(changed))
    })
}
