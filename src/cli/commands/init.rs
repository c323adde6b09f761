use crate::config::{CONFIG_TEMPLATE, CliOverrides, ROOTSYNC_DIR_NAME, Settings};
use crate::error::{Result, RootsyncError};
use crate::import::STAGING_SUBFOLDER;
use crate::storage::SqliteStorage;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::info;

const GITIGNORE: &str = r"# Database
*.db
*.db-shm
*.db-wal

# Temporary
*.tmp
";

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(force: bool, json: bool, root_dir: Option<&Path>, cli: &CliOverrides) -> Result<()> {
    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let rootsync_dir = base_dir.join(ROOTSYNC_DIR_NAME);

    if !rootsync_dir.exists() {
        fs::create_dir(&rootsync_dir)?;
    }

    let config_path = rootsync_dir.join("config.yaml");
    if !config_path.exists() {
        fs::write(&config_path, CONFIG_TEMPLATE)?;
    }

    let settings = Settings::load(&rootsync_dir, cli)?;
    if settings.db_path.exists() && !force {
        return Err(RootsyncError::AlreadyInitialized {
            path: settings.db_path,
        });
    }

    // Opening creates the file and applies the schema.
    SqliteStorage::open(&settings.db_path)?;

    let gitignore_path = rootsync_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, GITIGNORE)?;
    }

    fs::create_dir_all(settings.media_root.join(&settings.media_subfolder))?;
    fs::create_dir_all(settings.media_root.join(STAGING_SUBFOLDER))?;
    info!(db = %settings.db_path.display(), media = %settings.media_root.display(), "Initialized workspace");

    if json {
        let output = json!({
            "rootsync_dir": rootsync_dir,
            "db_path": settings.db_path,
            "media_root": settings.media_root,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Initialized rootsync workspace in {ROOTSYNC_DIR_NAME}/");
    }
    Ok(())
}
