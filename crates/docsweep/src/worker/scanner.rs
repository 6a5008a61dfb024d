use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::db::file_repo::{self, NewFile};
use crate::db::Database;
use crate::error::{DocsweepError, WorkerError};

const REGISTER_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Regular files walked.
    pub seen: usize,
    /// Files with a supported extension.
    pub matched: usize,
    /// Files newly added to the job.
    pub registered: usize,
    /// Entries that could not be read or whose path is not valid UTF-8.
    pub skipped: usize,
}

/// Recursive scan of a directory tree that registers supported files with
/// a job.
pub struct DirectoryScanner {
    root: PathBuf,
    extensions: HashSet<String>,
}

/// Lowercase extension including the dot, or an empty string.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn describe(path: &Path) -> Result<NewFile, std::io::Error> {
    let stored = path.to_str().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "path is not valid UTF-8")
    })?;
    let metadata = std::fs::metadata(path)?;
    let modified_at = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
    Ok(NewFile {
        path: stored.to_string(),
        size: metadata.len() as i64,
        file_type: file_type_of(path),
        modified_at,
    })
}

impl DirectoryScanner {
    /// Extensions match case-insensitively, with or without a leading dot.
    pub fn new<P: AsRef<Path>>(root: P, extensions: &[String]) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.iter().map(|e| normalize_extension(e)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.extensions.contains(&file_type_of(path))
    }

    /// Walks the tree and registers every supported file with `job_id`.
    /// Registering is idempotent, so rescanning only adds new files.
    pub fn register(&self, db: &Database, job_id: i64) -> Result<ScanSummary, DocsweepError> {
        if !self.root.is_dir() {
            return Err(WorkerError::DirectoryNotFound(self.root.clone()).into());
        }
        info!("Scanning directory: {}", self.root.display());

        let mut summary = ScanSummary::default();
        let mut pending = Vec::with_capacity(REGISTER_CHUNK);

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            summary.seen += 1;

            let path = entry.path();
            if !self.is_supported(path) {
                continue;
            }
            summary.matched += 1;

            match describe(path) {
                Ok(file) => pending.push(file),
                Err(e) => {
                    warn!("Error accessing file {}: {}", path.display(), e);
                    summary.skipped += 1;
                    continue;
                }
            }

            if pending.len() >= REGISTER_CHUNK {
                summary.registered += self.flush(db, job_id, &mut pending)?;
            }
        }
        summary.registered += self.flush(db, job_id, &mut pending)?;

        info!(
            "Directory scan complete: {} files seen, {} supported, {} newly registered, {} skipped",
            summary.seen, summary.matched, summary.registered, summary.skipped
        );
        Ok(summary)
    }

    fn flush(
        &self,
        db: &Database,
        job_id: i64,
        pending: &mut Vec<NewFile>,
    ) -> Result<usize, DocsweepError> {
        if pending.is_empty() {
            return Ok(0);
        }
        let registered = file_repo::register_files(db, job_id, pending)?
            .ok_or(DocsweepError::JobNotFound(job_id))?;
        debug!("Registered {} of {} files", registered, pending.len());
        pending.clear();
        Ok(registered)
    }

    /// Registers an explicit list of files instead of walking the root.
    /// Missing or unsupported paths are skipped.
    pub fn register_paths(
        &self,
        db: &Database,
        job_id: i64,
        paths: &[PathBuf],
    ) -> Result<ScanSummary, DocsweepError> {
        let mut summary = ScanSummary::default();
        let mut pending = Vec::new();

        for path in paths {
            if !path.is_file() {
                warn!("File not found or not a regular file: {}", path.display());
                summary.skipped += 1;
                continue;
            }
            summary.seen += 1;
            if !self.is_supported(path) {
                continue;
            }
            summary.matched += 1;
            match describe(path) {
                Ok(file) => pending.push(file),
                Err(e) => {
                    warn!("Error accessing file {}: {}", path.display(), e);
                    summary.skipped += 1;
                }
            }
        }
        summary.registered = self.flush(db, job_id, &mut pending)?;
        Ok(summary)
    }
}
