//! Configuration management for `rootsync`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`ROOTSYNC_*`)
//! 3. Project config (.rootsync/config.yaml)
//! 4. User config (~/.config/rootsync/config.yaml)
//! 5. Defaults

use crate::error::{Result, RootsyncError};
use crate::import::DEFAULT_MEDIA_SUBFOLDER;
use crate::storage::SqliteStorage;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Workspace directory name, found by walking up from the current directory.
pub const ROOTSYNC_DIR_NAME: &str = ".rootsync";

const DEFAULT_DB_FILENAME: &str = "rootsync.db";
const DEFAULT_MEDIA_DIR: &str = "media";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
const ENV_PREFIX: &str = "ROOTSYNC_";

const DB_KEYS: &[&str] = &["db"];
const MEDIA_ROOT_KEYS: &[&str] = &["media-root"];
const MEDIA_SUBFOLDER_KEYS: &[&str] = &["media-subfolder"];
const GRAMPS_MEDIA_KEYS: &[&str] = &["gramps-media"];
const LOCK_TIMEOUT_KEYS: &[&str] = &["lock-timeout"];

/// Template written by `rootsync init`.
pub const CONFIG_TEMPLATE: &str = "\
# rootsync configuration
#
# Relative paths are resolved against the directory holding .rootsync/.
# Environment variables (ROOTSYNC_MEDIA_ROOT, ROOTSYNC_DB, ...) override
# these values; command-line flags override both.

# db: .rootsync/rootsync.db
# media:
#   root: media
#   subfolder: imported
# gramps:
#   media: /path/to/gramps/media
# lock-timeout: 30000
";

/// Fully resolved settings for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rootsync_dir: PathBuf,
    pub db_path: PathBuf,
    pub media_root: PathBuf,
    pub media_subfolder: String,
    pub gramps_media_base: Option<PathBuf>,
    pub lock_timeout_ms: u64,
}

impl Settings {
    /// Resolve settings for the workspace at `rootsync_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or a value is invalid.
    pub fn load(rootsync_dir: &Path, cli: &CliOverrides) -> Result<Self> {
        let layer = load_config(rootsync_dir, cli)?;
        Self::from_layer(rootsync_dir, &layer)
    }

    /// Build settings from a merged layer.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the lock timeout is not a number.
    pub fn from_layer(rootsync_dir: &Path, layer: &ConfigLayer) -> Result<Self> {
        let workspace = workspace_root(rootsync_dir);
        let path_value = |keys: &[&str]| {
            layer
                .get(keys)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| resolve_relative(&workspace, value))
        };

        let lock_timeout_ms = match layer.get(LOCK_TIMEOUT_KEYS) {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                RootsyncError::Config(format!("lock-timeout must be milliseconds, got '{value}'"))
            })?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        let media_subfolder = layer
            .get(MEDIA_SUBFOLDER_KEYS)
            .map(|value| value.trim().trim_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MEDIA_SUBFOLDER.to_string());

        Ok(Self {
            rootsync_dir: rootsync_dir.to_path_buf(),
            db_path: path_value(DB_KEYS).unwrap_or_else(|| rootsync_dir.join(DEFAULT_DB_FILENAME)),
            media_root: path_value(MEDIA_ROOT_KEYS)
                .unwrap_or_else(|| workspace.join(DEFAULT_MEDIA_DIR)),
            media_subfolder,
            gramps_media_base: path_value(GRAMPS_MEDIA_KEYS),
            lock_timeout_ms,
        })
    }
}

/// The directory that holds `.rootsync/`.
fn workspace_root(rootsync_dir: &Path) -> PathBuf {
    rootsync_dir
        .parent()
        .map_or_else(|| rootsync_dir.to_path_buf(), Path::to_path_buf)
}

fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Discover the active `.rootsync` directory.
///
/// Honors `ROOTSYNC_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns `NotInitialized` if no workspace is found, or an I/O error if the
/// CWD cannot be read.
pub fn discover_rootsync_dir(start: Option<&Path>) -> Result<PathBuf> {
    let env_dir = env::var("ROOTSYNC_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    discover_rootsync_dir_with_env(start, env_dir.as_deref())
}

fn discover_rootsync_dir_with_env(
    start: Option<&Path>,
    env_override: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = env_override {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(ROOTSYNC_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    Err(RootsyncError::NotInitialized)
}

/// Open the workspace database.
///
/// # Errors
///
/// Returns `DatabaseNotFound` if the database file is missing, or a database
/// error if it cannot be opened.
pub fn open_storage(settings: &Settings) -> Result<SqliteStorage> {
    if !settings.db_path.is_file() {
        return Err(RootsyncError::DatabaseNotFound {
            path: settings.db_path.clone(),
        });
    }
    SqliteStorage::open_with_timeout(&settings.db_path, Some(settings.lock_timeout_ms))
}

/// Settings plus the storage they point at.
#[derive(Debug)]
pub struct StorageContext {
    pub settings: Settings,
    pub storage: SqliteStorage,
}

/// Discover the workspace from `start` (or CWD), load settings and open the
/// database.
///
/// # Errors
///
/// Returns `NotInitialized` outside a workspace, a config error, or
/// `DatabaseNotFound` / a database error from opening storage.
pub fn open_storage_with_cli(start: Option<&Path>, cli: &CliOverrides) -> Result<StorageContext> {
    let rootsync_dir = discover_rootsync_dir(start)?;
    let settings = Settings::load(&rootsync_dir, cli)?;
    let storage = open_storage(&settings)?;
    Ok(StorageContext { settings, storage })
}

/// One configuration source as flat, normalized key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Set a key, normalizing it first.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// First value found under any of `keys`.
    #[must_use]
    pub fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.values.get(&normalize_key(key)))
            .map(String::as_str)
    }

    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        let mut flat = HashMap::new();
        flatten_yaml(&value, "", &mut flat);

        let mut layer = Self::default();
        for (key, value) in flat {
            layer.insert(&key, value);
        }
        Ok(layer)
    }

    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_vars(env::vars())
    }

    /// Build a layer from `ROOTSYNC_*` pairs. `ROOTSYNC_MEDIA_ROOT` becomes
    /// `media-root`.
    #[must_use]
    pub fn from_env_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if stripped == "DIR" {
                continue;
            }
            layer.insert(stripped, value);
        }
        layer
    }
}

/// CLI overrides for config loading.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub gramps_media: Option<PathBuf>,
    pub lock_timeout: Option<u64>,
}

impl CliOverrides {
    /// Paths given on the command line are taken relative to the CWD.
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        let absolute = |path: &PathBuf| {
            std::path::absolute(path)
                .unwrap_or_else(|_| path.clone())
                .to_string_lossy()
                .into_owned()
        };

        if let Some(path) = &self.db {
            layer.insert("db", absolute(path));
        }
        if let Some(path) = &self.media_root {
            layer.insert("media-root", absolute(path));
        }
        if let Some(path) = &self.gramps_media {
            layer.insert("gramps-media", absolute(path));
        }
        if let Some(timeout) = self.lock_timeout {
            layer.insert("lock-timeout", timeout.to_string());
        }
        layer
    }
}

/// Load project config (.rootsync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(rootsync_dir: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&rootsync_dir.join("config.yaml"))
}

/// Load user config (~/.config/rootsync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("rootsync")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load configuration with the documented precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(rootsync_dir: &Path, cli: &CliOverrides) -> Result<ConfigLayer> {
    let user = load_user_config()?;
    let project = load_project_config(rootsync_dir)?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[user, project, env_layer, cli_layer]))
}

/// Lowercase, `_` to `-`, aliases folded onto one canonical key.
fn normalize_key(key: &str) -> String {
    let key = key.trim().to_lowercase().replace('_', "-");
    let canonical = match key.as_str() {
        "database" => "db",
        "media.root" => "media-root",
        "media.subfolder" => "media-subfolder",
        "gramps.media" | "gramps.media-base" | "gramps-media-base" => "gramps-media",
        _ => return key,
    };
    canonical.to_string()
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
