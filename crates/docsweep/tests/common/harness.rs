//! Isolated environment for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use docsweep::db::file_repo::{self, NewFile};
use docsweep::db::job_repo::{self, NewJob};
use docsweep::Database;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory the tests scan.
    pub input_dir: PathBuf,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("share");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        let db_path = temp_dir.path().join("state").join("docsweep.db");

        Self {
            temp_dir,
            input_dir,
            db_path,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens a new connection to the harness database.
    pub fn open_db(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open database")
    }

    pub fn write_input(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create input subdirectory");
        }
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Writes `count` text files named `file_00.txt`, `file_01.txt`, ...
    pub fn write_text_files(&self, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| self.write_input(&format!("file_{:02}.txt", i), b"Contact: jane@example.com"))
            .collect()
    }

    /// Creates a job and registers `count` synthetic paths with it, without
    /// touching the filesystem.
    pub fn seed_job(db: &Database, count: usize) -> i64 {
        let job_id = job_repo::create_job(
            db,
            &NewJob {
                name: "integration".to_string(),
                ..Default::default()
            },
        )
        .expect("Failed to create job");
        let files: Vec<NewFile> = (0..count)
            .map(|i| NewFile {
                path: format!("/share/file_{:02}.txt", i),
                size: 128,
                file_type: ".txt".to_string(),
                modified_at: None,
            })
            .collect();
        file_repo::register_files(db, job_id, &files).expect("Failed to register files");
        job_id
    }

    /// Number of result rows per file of the job, in file order.
    pub fn result_rows_per_file(db: &Database, job_id: i64) -> Vec<i64> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COUNT(r.id) FROM files f
                 LEFT JOIN results r ON r.file_id = f.id
                 WHERE f.job_id = ?1
                 GROUP BY f.id ORDER BY f.id",
            )?;
            let rows = stmt
                .query_map([job_id], |r| r.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .expect("Failed to count results")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
