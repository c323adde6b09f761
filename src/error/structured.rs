//! Structured error output for scripted callers.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

#![allow(clippy::option_if_let_else)]

use crate::error::RootsyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    DatabaseNotFound,
    DatabaseError,
    NotInitialized,
    AlreadyInitialized,

    // === Lookup Errors (exit code 3) ===
    PersonNotFound,
    BatchNotFound,

    // === Validation Errors (exit code 4) ===
    ValidationFailed,

    // === Import Errors (exit code 6) ===
    InputNotFound,
    NoDocumentInArchive,
    DocumentParseError,

    // === Config Errors (exit code 7) ===
    ConfigError,
    ConfigParseError,

    // === I/O Errors (exit code 8) ===
    IoError,
    JsonError,

    // === Internal Errors (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::PersonNotFound => "PERSON_NOT_FOUND",
            Self::BatchNotFound => "BATCH_NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InputNotFound => "INPUT_NOT_FOUND",
            Self::NoDocumentInArchive => "NO_DOCUMENT_IN_ARCHIVE",
            Self::DocumentParseError => "DOCUMENT_PARSE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ConfigParseError => "CONFIG_PARSE_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying (possibly after fixing input) can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed | Self::InputNotFound | Self::DatabaseError
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Database errors
    /// - 3: Lookup errors
    /// - 4: Validation errors
    /// - 6: Import errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound
            | Self::DatabaseError
            | Self::NotInitialized
            | Self::AlreadyInitialized => 2,
            Self::PersonNotFound | Self::BatchNotFound => 3,
            Self::ValidationFailed => 4,
            Self::InputNotFound | Self::NoDocumentInArchive | Self::DocumentParseError => 6,
            Self::ConfigError | Self::ConfigParseError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `RootsyncError`.
    #[must_use]
    pub fn from_error(err: &RootsyncError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        let hint = err.suggestion().map(str::to_string);

        Self {
            code,
            message: err.to_string(),
            hint,
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Create a "person not found" error carrying close matches.
    #[must_use]
    pub fn person_not_found(searched_id: &str, existing_ids: &[String]) -> Self {
        let similar = find_similar_ids(searched_id, existing_ids, 3);

        let hint = if similar.is_empty() {
            Some("Run 'rootsync stats' to check that an import has run.".to_string())
        } else if similar.len() == 1 {
            Some(format!("Did you mean '{}'?", similar[0]))
        } else {
            Some(format!("Did you mean one of: {}?", similar.join(", ")))
        };

        Self {
            code: ErrorCode::PersonNotFound,
            message: format!("Person not found: {searched_id}"),
            hint,
            retryable: false,
            context: Some(json!({
                "searched_id": searched_id,
                "similar_ids": similar,
            })),
        }
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_code_and_context(err: &RootsyncError) -> (ErrorCode, Option<Value>) {
        match err {
            RootsyncError::InputNotFound { path } => (
                ErrorCode::InputNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            RootsyncError::NoDocumentInArchive { path } => (
                ErrorCode::NoDocumentInArchive,
                Some(json!({"path": path.display().to_string()})),
            ),
            RootsyncError::DocumentParse { path, reason } => (
                ErrorCode::DocumentParseError,
                Some(json!({"path": path.display().to_string(), "reason": reason})),
            ),
            RootsyncError::Xml(_) => (ErrorCode::DocumentParseError, None),
            RootsyncError::DatabaseNotFound { path } => (
                ErrorCode::DatabaseNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            RootsyncError::Database(_) => (ErrorCode::DatabaseError, None),
            RootsyncError::NotInitialized => (ErrorCode::NotInitialized, None),
            RootsyncError::AlreadyInitialized { path } => (
                ErrorCode::AlreadyInitialized,
                Some(json!({"path": path.display().to_string()})),
            ),
            RootsyncError::PersonNotFound { gramps_id } => (
                ErrorCode::PersonNotFound,
                Some(json!({"searched_id": gramps_id})),
            ),
            RootsyncError::BatchNotFound { id } => {
                (ErrorCode::BatchNotFound, Some(json!({"batch_id": id})))
            }
            RootsyncError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            RootsyncError::Config(_) => (ErrorCode::ConfigError, None),
            RootsyncError::Yaml(_) => (ErrorCode::ConfigParseError, None),
            RootsyncError::Io(_) => (ErrorCode::IoError, None),
            RootsyncError::Json(_) => (ErrorCode::JsonError, None),
            RootsyncError::Other(_) => (ErrorCode::InternalError, None),
        }
    }
}

/// Calculate Levenshtein distance between two strings.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Find ids similar to `target`, closest first. Comparison is case-insensitive.
#[must_use]
pub fn find_similar_ids(target: &str, candidates: &[String], max_results: usize) -> Vec<String> {
    let target = target.to_lowercase();
    let threshold = (target.len() / 2).max(2);

    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .map(|id| (levenshtein_distance(&target, &id.to_lowercase()), id))
        .filter(|(distance, _)| *distance <= threshold)
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(max_results)
        .map(|(_, id)| id.clone())
        .collect()
}
