//! Read side of the store: results, entities, statistics and export.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::job_repo;
use super::models::{FileStatus, JobRecord, JobStatus, ResultRecord};
use super::{Database, DatabaseError};
use crate::detection::DetectedEntity;

/// One file's entry in a job export.
#[derive(Debug, Clone, Serialize)]
pub struct FileExport {
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub entities: Vec<DetectedEntity>,
}

/// A job with every registered file and its latest result.
#[derive(Debug, Clone, Serialize)]
pub struct JobExport {
    pub job: JobRecord,
    pub results: Vec<FileExport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatistics {
    pub job: JobRecord,
    pub file_types: BTreeMap<String, i64>,
    pub entity_types: BTreeMap<String, i64>,
    pub avg_processing_time: f64,
    pub total_bytes: i64,
    pub largest_file: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionEstimate {
    pub status: JobStatus,
    pub total_files: i64,
    pub processed_files: i64,
    pub error_files: i64,
    pub remaining_files: i64,
    pub percent_complete: f64,
    /// Files per second since the job was created. Only computed while the
    /// job is running.
    pub files_per_second: Option<f64>,
    pub estimated_seconds_remaining: Option<f64>,
}

/// The latest result of a file, if it has one.
pub fn get_result(db: &Database, file_id: i64) -> Result<Option<ResultRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM results WHERE file_id = ?1",
                params![file_id],
                ResultRecord::from_row,
            )
            .optional()?)
    })
}

fn load_entities(conn: &Connection, result_id: i64) -> Result<Vec<DetectedEntity>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, text, start_index, end_index, score
         FROM entities WHERE result_id = ?1 ORDER BY id",
    )?;
    let entities = stmt
        .query_map(params![result_id], |r| {
            Ok(DetectedEntity {
                entity_type: r.get(0)?,
                text: r.get(1)?,
                start: r.get::<_, i64>(2)?.max(0) as usize,
                end: r.get::<_, i64>(3)?.max(0) as usize,
                score: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

pub fn entities_for_result(
    db: &Database,
    result_id: i64,
) -> Result<Vec<DetectedEntity>, DatabaseError> {
    db.with_conn(|conn| load_entities(conn, result_id))
}

/// Exports a job with all its files. Returns `None` if the job does not
/// exist.
pub fn export_results(
    db: &Database,
    job_id: i64,
    include_entities: bool,
) -> Result<Option<JobExport>, DatabaseError> {
    let Some(job) = job_repo::get_job(db, job_id)? else {
        return Ok(None);
    };

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT f.path, f.file_type, f.size, f.status, f.error_message,
                    r.id AS result_id, r.processing_time, r.metadata
             FROM files f
             LEFT JOIN results r ON r.file_id = f.id
             WHERE f.job_id = ?1
             ORDER BY f.id",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok((
                    r.get::<_, String>("path")?,
                    r.get::<_, String>("file_type")?,
                    r.get::<_, i64>("size")?,
                    super::models::parse_column::<FileStatus>(r, "status")?,
                    r.get::<_, Option<String>>("error_message")?,
                    r.get::<_, Option<i64>>("result_id")?,
                    r.get::<_, Option<f64>>("processing_time")?,
                    r.get::<_, Option<String>>("metadata")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (path, file_type, size, status, error_message, result_id, time, metadata) in rows {
            let metadata = match metadata {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::warn!("Ignoring unreadable metadata for {}: {}", path, e);
                        None
                    }
                },
                None => None,
            };
            let entities = match result_id {
                Some(id) if include_entities => load_entities(conn, id)?,
                _ => Vec::new(),
            };
            results.push(FileExport {
                file_path: path,
                file_type,
                file_size: size,
                status,
                error_message,
                processing_time: time.unwrap_or(0.0),
                metadata,
                entities,
            });
        }

        Ok(Some(JobExport { job, results }))
    })
}

/// Entity counts per type over completed files, counting only entities
/// scored at or above `threshold`. Ordered by type name.
pub fn entity_counts_by_type(
    db: &Database,
    job_id: i64,
    threshold: f64,
) -> Result<BTreeMap<String, i64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT e.entity_type, COUNT(*) FROM entities e
             JOIN results r ON e.result_id = r.id
             JOIN files f ON r.file_id = f.id
             WHERE f.job_id = ?1 AND f.status = ?2 AND e.score >= ?3
             GROUP BY e.entity_type",
        )?;
        let counts = stmt
            .query_map(
                params![job_id, FileStatus::Completed.as_str(), threshold],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
            )?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    })
}

pub fn job_statistics(db: &Database, job_id: i64) -> Result<Option<JobStatistics>, DatabaseError> {
    let Some(job) = job_repo::get_job(db, job_id)? else {
        return Ok(None);
    };
    let entity_types = entity_counts_by_type(db, job_id, 0.0)?;

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_type, COUNT(*) FROM files WHERE job_id = ?1 GROUP BY file_type",
        )?;
        let file_types = stmt
            .query_map(params![job_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let avg_processing_time: Option<f64> = conn.query_row(
            "SELECT AVG(r.processing_time) FROM results r
             JOIN files f ON r.file_id = f.id
             WHERE f.job_id = ?1 AND f.status = ?2",
            params![job_id, FileStatus::Completed.as_str()],
            |r| r.get(0),
        )?;
        let (total_bytes, largest_file): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(size), 0), COALESCE(MAX(size), 0) FROM files WHERE job_id = ?1",
            params![job_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(Some(JobStatistics {
            job,
            file_types,
            entity_types,
            avg_processing_time: avg_processing_time.unwrap_or(0.0),
            total_bytes,
            largest_file,
        }))
    })
}

/// Progress and a naive remaining-time estimate from the job counters.
pub fn estimate_completion(
    db: &Database,
    job_id: i64,
) -> Result<Option<CompletionEstimate>, DatabaseError> {
    let Some(job) = job_repo::get_job(db, job_id)? else {
        return Ok(None);
    };
    Ok(Some(estimate_for(&job, chrono::Utc::now())))
}

fn estimate_for(job: &JobRecord, now: chrono::DateTime<chrono::Utc>) -> CompletionEstimate {
    let done = job.processed_files + job.error_files;
    let remaining = job.remaining_files();
    let percent_complete = if job.total_files > 0 {
        done as f64 * 100.0 / job.total_files as f64
    } else {
        0.0
    };

    let mut files_per_second = None;
    let mut estimated_seconds_remaining = None;
    if job.status == JobStatus::Running {
        if let Ok(started) = chrono::DateTime::parse_from_rfc3339(&job.created_at) {
            let elapsed = now.signed_duration_since(started).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 && done > 0 {
                let rate = done as f64 / elapsed;
                files_per_second = Some(rate);
                estimated_seconds_remaining = Some(remaining as f64 / rate);
            }
        }
    }

    CompletionEstimate {
        status: job.status,
        total_files: job.total_files,
        processed_files: job.processed_files,
        error_files: job.error_files,
        remaining_files: remaining,
        percent_complete,
        files_per_second,
        estimated_seconds_remaining,
    }
}
