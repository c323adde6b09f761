#![allow(dead_code)]

use rootsync::import::{ImportOptions, ImportSummary, run_import};
use rootsync::storage::SqliteStorage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;

pub mod cli;
pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        rootsync::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

pub fn test_db() -> SqliteStorage {
    init_test_logging();
    SqliteStorage::open_memory().expect("Failed to create test database")
}

/// A scratch directory with an input area and a managed media root.
pub struct ImportBed {
    pub temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub media_root: PathBuf,
    pub storage: SqliteStorage,
}

impl ImportBed {
    pub fn new() -> Self {
        init_test_logging();
        let temp_dir = TempDir::new().expect("temp dir");
        let input_dir = temp_dir.path().join("input");
        let media_root = temp_dir.path().join("media");
        fs::create_dir_all(&input_dir).expect("input dir");
        let db_path = temp_dir.path().join("tree.db");
        let storage = SqliteStorage::open(&db_path).expect("open database");
        Self {
            temp_dir,
            input_dir,
            media_root,
            storage,
        }
    }

    pub fn options(&self) -> ImportOptions {
        ImportOptions::new(self.media_root.clone())
    }

    /// Write a plain document named `name` into the input area.
    pub fn write_document(&self, name: &str, xml: &str) -> PathBuf {
        let path = self.input_dir.join(name);
        fs::write(&path, xml).expect("write document");
        path
    }

    /// Write a file (creating parents) under the input area.
    pub fn write_input_file(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.input_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, bytes).expect("write input file");
        path
    }

    pub fn import(&mut self, path: &Path) -> ImportSummary {
        let options = self.options();
        run_import(&mut self.storage, path, &options).expect("import succeeds")
    }

    pub fn import_with(&mut self, path: &Path, options: &ImportOptions) -> ImportSummary {
        run_import(&mut self.storage, path, options).expect("import succeeds")
    }

    pub fn managed(&self, relative: &str) -> PathBuf {
        self.media_root.join(relative)
    }
}
