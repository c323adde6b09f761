//! Media resolution: find a recorded media file on disk and bring it under
//! the managed media root.

use crate::util::{files_identical, to_slash_path};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions treated as images, lowercase with the leading dot.
pub const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp"];

/// Whether a file name carries an image extension (case-insensitive).
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// MIME type for a dotted extension such as `.png`.
#[must_use]
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".tiff" => "image/tiff",
        ".webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

fn is_absolute_like(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\');
    path.starts_with(is_separator) || drive
}

/// Last path segment, splitting on either separator style.
#[must_use]
pub fn bare_name(path: &str) -> &str {
    path.rsplit(is_separator).next().unwrap_or(path)
}

/// Normalize a recorded media path.
///
/// Absolute paths (POSIX, UNC or drive-letter) come from another machine and
/// reduce to the bare file name, as do paths that climb with `..`. Relative
/// paths get `/` separators and lose `.` and empty segments.
#[must_use]
pub fn normalize_media_path(src: &str) -> String {
    let src = src.trim();
    let segments: Vec<&str> = src
        .split(is_separator)
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if is_absolute_like(src) || segments.contains(&"..") {
        return segments
            .last()
            .filter(|s| **s != "..")
            .map_or_else(String::new, |s| (*s).to_string());
    }
    segments.join("/")
}

/// How a media path was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Copied into the managed subfolder.
    Copied,
    /// An identical file was already at the destination.
    Reused,
    /// The file already lives under the managed root.
    AlreadyManaged,
    /// Not found anywhere; the normalized path is kept.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Path relative to the managed root, or the normalized source path.
    pub stored_path: String,
    pub outcome: MediaOutcome,
}

impl ResolvedMedia {
    fn unresolved(stored_path: String) -> Self {
        Self {
            stored_path,
            outcome: MediaOutcome::Unresolved,
        }
    }
}

/// Resolves recorded media paths against an ordered list of directories.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    candidates: Vec<PathBuf>,
    media_root: PathBuf,
    subfolder: String,
}

impl MediaResolver {
    /// Build a resolver. The managed root is appended to `search_dirs`, and
    /// repeated directories are dropped. The copy subfolder is never searched:
    /// its names are assigned per asset, so a name match there may belong to
    /// another asset.
    #[must_use]
    pub fn new(
        search_dirs: impl IntoIterator<Item = PathBuf>,
        media_root: &Path,
        subfolder: &str,
    ) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        for dir in search_dirs.into_iter().chain([media_root.to_path_buf()]) {
            if !candidates.contains(&dir) {
                candidates.push(dir);
            }
        }
        Self {
            candidates,
            media_root: media_root.to_path_buf(),
            subfolder: subfolder.to_string(),
        }
    }

    /// Search directories in lookup order.
    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    #[must_use]
    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Resolve a recorded `src` attribute. Never fails: anything that goes
    /// wrong leaves the media unresolved.
    #[must_use]
    pub fn resolve(&self, src: &str) -> ResolvedMedia {
        let normalized = normalize_media_path(src);
        if normalized.is_empty() {
            return ResolvedMedia::unresolved(normalized);
        }

        match self.find(&normalized) {
            Some(found) => self
                .manage(&found)
                .unwrap_or_else(|| ResolvedMedia::unresolved(normalized)),
            None => {
                debug!(src = %src, "Media file not found in any candidate directory");
                ResolvedMedia::unresolved(normalized)
            }
        }
    }

    /// Bring an existing file under the managed root.
    ///
    /// Returns `None` if copying failed; the failure is logged.
    #[must_use]
    pub fn manage(&self, found: &Path) -> Option<ResolvedMedia> {
        if let Some(relative) = self.managed_relative(found) {
            return Some(ResolvedMedia {
                stored_path: relative,
                outcome: MediaOutcome::AlreadyManaged,
            });
        }
        match self.copy_in(found) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                warn!(file = %found.display(), error = %err, "Could not copy media file");
                None
            }
        }
    }

    /// The asset's earlier managed copy, if `stored_path` still names a file
    /// under the managed root.
    #[must_use]
    pub fn previous_copy(&self, stored_path: &str) -> Option<ResolvedMedia> {
        if stored_path.is_empty() {
            return None;
        }
        let path = self.media_root.join(stored_path);
        if !path.is_file() {
            return None;
        }
        self.managed_relative(&path).map(|relative| ResolvedMedia {
            stored_path: relative,
            outcome: MediaOutcome::AlreadyManaged,
        })
    }

    fn find(&self, normalized: &str) -> Option<PathBuf> {
        let bare = bare_name(normalized);
        for dir in &self.candidates {
            let direct = dir.join(normalized);
            if direct.is_file() {
                return Some(direct);
            }
            if bare != normalized {
                let by_name = dir.join(bare);
                if by_name.is_file() {
                    return Some(by_name);
                }
            }
        }
        None
    }

    fn managed_relative(&self, found: &Path) -> Option<String> {
        let root = self.media_root.canonicalize().ok()?;
        let file = found.canonicalize().ok()?;
        file.strip_prefix(&root).ok().map(to_slash_path)
    }

    fn copy_in(&self, source: &Path) -> std::io::Result<ResolvedMedia> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest_dir = self.media_root.join(&self.subfolder);
        fs::create_dir_all(&dest_dir)?;

        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = Path::new(&name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut candidate = name.clone();
        let mut n = 0_u32;
        loop {
            let dest = dest_dir.join(&candidate);
            if !dest.exists() {
                fs::copy(source, &dest)?;
                debug!(from = %source.display(), to = %dest.display(), "Copied media file");
                return Ok(self.stored(&candidate, MediaOutcome::Copied));
            }
            if files_identical(source, &dest)? {
                return Ok(self.stored(&candidate, MediaOutcome::Reused));
            }
            n += 1;
            candidate = format!("{stem}_{n}{ext}");
        }
    }

    fn stored(&self, file_name: &str, outcome: MediaOutcome) -> ResolvedMedia {
        let relative = Path::new(&self.subfolder).join(file_name);
        ResolvedMedia {
            stored_path: to_slash_path(&relative),
            outcome,
        }
    }
}
