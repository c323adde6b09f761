//! Shared utilities for `rootsync`.
//!
//! Common functionality used across modules:
//! - Gramps date, change-time and coordinate parsing
//! - Storage timestamp formatting (RFC3339)
//! - File content hashing (SHA256)
//! - Progress indicators (for long-running operations)
//! - Path helpers (workspace-relative display, `/` separators)

mod hash;
pub mod progress;
pub mod time;

pub use hash::{file_digest, files_identical, short_hash};
pub use time::{
    format_date, format_timestamp, parse_change_time, parse_coordinate, parse_date,
    parse_gramps_date, parse_timestamp,
};

use std::path::{Component, Path};

/// Render a relative path with `/` separators regardless of platform.
#[must_use]
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Lower-cased extension of a file name, with the leading dot.
#[must_use]
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_to_slash_path() {
        let path: PathBuf = ["imported", "sub", "photo.jpg"].iter().collect();
        assert_eq!(to_slash_path(&path), "imported/sub/photo.jpg");
        assert_eq!(to_slash_path(Path::new("./a/b.png")), "a/b.png");
    }

    #[test]
    fn test_dotted_extension() {
        assert_eq!(dotted_extension(Path::new("x/Photo.JPG")), Some(".jpg".to_string()));
        assert_eq!(dotted_extension(Path::new("README")), None);
    }
}
