//! Job repository: the `jobs` and `job_metadata` tables.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use super::models::{FileStatus, JobRecord, JobStatus};
use super::{now_timestamp, Database, DatabaseError};

/// Parameters for a new job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub name: String,
    /// Processing settings serialized as JSON.
    pub settings: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Creates a job in `created` state with zeroed counters and returns its id.
pub fn create_job(db: &Database, job: &NewJob) -> Result<i64, DatabaseError> {
    db.with_tx(|tx| {
        let now = now_timestamp();
        tx.execute(
            "INSERT INTO jobs (name, status, created_at, updated_at, settings)
             VALUES (?1, ?2, ?3, ?3, ?4)",
            params![job.name, JobStatus::Created.as_str(), now, job.settings],
        )?;
        let id = tx.last_insert_rowid();
        for (key, value) in &job.metadata {
            tx.execute(
                "INSERT INTO job_metadata (job_id, key, value) VALUES (?1, ?2, ?3)",
                params![id, key, value],
            )?;
        }
        log::debug!("Created job {} '{}'", id, job.name);
        Ok(id)
    })
}

fn load_metadata(conn: &Connection, job: &mut JobRecord) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare("SELECT key, value FROM job_metadata WHERE job_id = ?1")?;
    job.metadata = stmt
        .query_map(params![job.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(())
}

fn get_with(conn: &Connection, job_id: i64) -> Result<Option<JobRecord>, DatabaseError> {
    let job = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![job_id],
            JobRecord::from_row,
        )
        .optional()?;
    match job {
        Some(mut job) => {
            load_metadata(conn, &mut job)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Finds a job by id, including its metadata.
pub fn get_job(db: &Database, job_id: i64) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| get_with(conn, job_id))
}

/// All jobs, newest first.
pub fn list_jobs(db: &Database) -> Result<Vec<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY id DESC")?;
        let mut jobs = stmt
            .query_map([], JobRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for job in &mut jobs {
            load_metadata(conn, job)?;
        }
        Ok(jobs)
    })
}

/// The most recently created job, if any.
pub fn latest_job(db: &Database) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let id: Option<i64> = conn
            .query_row("SELECT MAX(id) FROM jobs", [], |r| r.get(0))?;
        match id {
            Some(id) => get_with(conn, id),
            None => Ok(None),
        }
    })
}

/// Jobs carrying `key = value` in their metadata, newest first.
pub fn find_jobs_by_metadata(
    db: &Database,
    key: &str,
    value: &str,
) -> Result<Vec<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT j.* FROM jobs j
             JOIN job_metadata m ON m.job_id = j.id
             WHERE m.key = ?1 AND m.value = ?2
             ORDER BY j.id DESC",
        )?;
        let mut jobs = stmt
            .query_map(params![key, value], JobRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for job in &mut jobs {
            load_metadata(conn, job)?;
        }
        Ok(jobs)
    })
}

/// Inserts or replaces one metadata entry. Returns `false` if the job does
/// not exist.
pub fn set_metadata(
    db: &Database,
    job_id: i64,
    key: &str,
    value: &str,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        if !job_exists(tx, job_id)? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO job_metadata (job_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id, key) DO UPDATE SET value = excluded.value",
            params![job_id, key, value],
        )?;
        Ok(true)
    })
}

/// Updates the status and `updated_at` of a job. Returns `false` if the job
/// does not exist.
pub fn update_status(db: &Database, job_id: i64, status: JobStatus) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![job_id, status.as_str(), now_timestamp()],
        )?;
        Ok(changed == 1)
    })
}

/// Recomputes the job's counters from the files table.
pub fn recount(db: &Database, job_id: i64) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET
               total_files = (SELECT COUNT(*) FROM files WHERE job_id = ?1),
               processed_files = (SELECT COUNT(*) FROM files WHERE job_id = ?1 AND status = ?2),
               error_files = (SELECT COUNT(*) FROM files WHERE job_id = ?1 AND status = ?3),
               updated_at = ?4
             WHERE id = ?1",
            params![
                job_id,
                FileStatus::Completed.as_str(),
                FileStatus::Error.as_str(),
                now_timestamp()
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        get_with(tx, job_id)
    })
}

pub(crate) fn job_exists(conn: &Connection, job_id: i64) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM jobs WHERE id = ?1", params![job_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}
