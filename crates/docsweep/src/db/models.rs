//! Row types shared by the repositories.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::DatabaseError;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Interrupted,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Error => "error",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "interrupted" => Ok(JobStatus::Interrupted),
            "error" => Ok(JobStatus::Error),
            other => Err(DatabaseError::InvalidValue {
                column: "jobs.status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Error => "error",
        }
    }
}

impl FromStr for FileStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "error" => Ok(FileStatus::Error),
            other => Err(DatabaseError::InvalidValue {
                column: "files.status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a status parse failure into a rusqlite conversion error so it can
/// be raised from inside `query_map` closures.
pub(crate) fn parse_column<T>(row: &Row<'_>, column: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr<Err = DatabaseError>,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub error_files: i64,
    /// Processing settings as JSON.
    pub settings: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl JobRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            status: parse_column(row, "status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            total_files: row.get("total_files")?,
            processed_files: row.get("processed_files")?,
            error_files: row.get("error_files")?,
            settings: row.get("settings")?,
            metadata: BTreeMap::new(),
        })
    }

    /// Files neither completed nor failed according to the counters.
    pub fn remaining_files(&self) -> i64 {
        (self.total_files - self.processed_files - self.error_files).max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub job_id: i64,
    pub path: String,
    pub size: i64,
    pub file_type: String,
    pub modified_at: Option<String>,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub process_start: Option<String>,
    pub process_end: Option<String>,
    pub attempts: i64,
}

impl FileRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            path: row.get("path")?,
            size: row.get("size")?,
            file_type: row.get("file_type")?,
            modified_at: row.get("modified_at")?,
            status: parse_column(row, "status")?,
            error_message: row.get("error_message")?,
            process_start: row.get("process_start")?,
            process_end: row.get("process_end")?,
            attempts: row.get("attempts")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub id: i64,
    pub file_id: i64,
    pub entity_count: i64,
    pub processing_time_secs: f64,
    /// Extraction metadata as JSON.
    pub metadata: Option<String>,
}

impl ResultRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_id: row.get("file_id")?,
            entity_count: row.get("entity_count")?,
            processing_time_secs: row.get("processing_time")?,
            metadata: row.get("metadata")?,
        })
    }
}

/// Number of files of one job in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.error
    }

    pub(crate) fn add(&mut self, status: FileStatus, count: i64) {
        match status {
            FileStatus::Pending => self.pending += count,
            FileStatus::Processing => self.processing += count,
            FileStatus::Completed => self.completed += count,
            FileStatus::Error => self.error += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            JobStatus::Created,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Interrupted,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("processing".parse::<FileStatus>().unwrap(), FileStatus::Processing);
        assert!("paused".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_status_counts_total() {
        let mut counts = StatusCounts::default();
        counts.add(FileStatus::Pending, 7);
        counts.add(FileStatus::Processing, 3);
        counts.add(FileStatus::Error, 1);
        assert_eq!(counts.total(), 11);
        assert_eq!(counts.completed, 0);
    }
}
