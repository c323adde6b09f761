//! Error types and handling for `rootsync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Only fatal conditions become errors; dangling references, unknown
//!   enum values and per-file media failures are resolved where they occur
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for scripted callers

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `rootsync` operations.
#[derive(Error, Debug)]
pub enum RootsyncError {
    // === Input Errors ===
    /// The file handed to the importer does not exist.
    #[error("Input file not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// A package archive was recognised but holds no `.gramps` document.
    #[error("No Gramps document found in archive '{path}'")]
    NoDocumentInArchive { path: PathBuf },

    /// The interchange document could not be parsed at all.
    #[error("Failed to parse Gramps document '{path}': {reason}")]
    DocumentParse { path: PathBuf, reason: String },

    /// Low-level XML reader error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Lookup Errors ===
    /// Person with the specified external id was not found.
    #[error("Person not found: {gramps_id}")]
    PersonNotFound { gramps_id: String },

    /// Import batch with the specified id was not found.
    #[error("Import batch not found: {id}")]
    BatchNotFound { id: i64 },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("rootsync not initialized: run 'rootsync init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RootsyncError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InputNotFound { .. }
                | Self::NoDocumentInArchive { .. }
                | Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::PersonNotFound { .. }
                | Self::Validation { .. }
                | Self::AlreadyInitialized { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: rootsync init"),
            Self::DatabaseNotFound { .. } => Some("Check --db or run: rootsync init"),
            Self::InputNotFound { .. } => Some("Check the path of the .gramps or .gpkg file"),
            Self::NoDocumentInArchive { .. } => {
                Some("The package must contain a member ending in .gramps")
            }
            Self::DocumentParse { .. } => {
                Some("Re-export the tree from Gramps as 'Gramps XML' or 'Gramps XML package'")
            }
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::PersonNotFound { .. } => Some("Person ids look like I0001; see: rootsync stats"),
            _ => None,
        }
    }

    /// Get the exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        StructuredError::from_error(self).code.exit_code()
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error for a document path.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DocumentParse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `RootsyncError`.
pub type Result<T> = std::result::Result<T, RootsyncError>;
