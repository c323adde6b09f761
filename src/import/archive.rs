//! Input resolution: Gramps XML package (tar in gzip) or bare document.
//!
//! A package is unpacked into a scratch directory that lives exactly as long
//! as the returned [`ResolvedInput`]. Anything that does not unpack as a tar
//! stream is a bare document, which may itself be gzip-compressed.

use crate::error::{Result, RootsyncError};
use crate::import::media::is_image_name;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DOCUMENT_SUFFIX: &str = ".gramps";

/// The document to parse plus where it came from.
#[derive(Debug)]
pub struct ResolvedInput {
    pub document_path: PathBuf,
    /// Scratch directory holding the unpacked package, if the input was one.
    pub extraction_root: Option<PathBuf>,
    /// Images copied into the staging area.
    pub staged_images: usize,
    scratch: Option<TempDir>,
}

impl ResolvedInput {
    #[must_use]
    pub const fn is_archive(&self) -> bool {
        self.scratch.is_some()
    }
}

/// Resolve `path` to a parseable document.
///
/// Image members of a package are also copied into `staging_dir` when given,
/// never overwriting an existing file there.
///
/// # Errors
///
/// Returns `InputNotFound` if `path` is not a file, `NoDocumentInArchive` if a
/// package holds no `.gramps` member, or an I/O error creating the scratch
/// directory.
pub fn resolve_input(path: &Path, staging_dir: Option<&Path>) -> Result<ResolvedInput> {
    if !path.is_file() {
        return Err(RootsyncError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    let scratch = tempfile::Builder::new().prefix("rootsync-").tempdir()?;
    let members = match unpack_archive(path, scratch.path()) {
        Ok(members) if !members.is_empty() => members,
        Ok(_) => {
            debug!(path = %path.display(), "Empty tar stream; treating input as a document");
            return Ok(bare_document(path));
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Not a package; treating input as a document");
            return Ok(bare_document(path));
        }
    };
    info!(path = %path.display(), members = members.len(), "Unpacked Gramps package");

    let mut documents = members
        .iter()
        .filter(|name| name.to_lowercase().ends_with(DOCUMENT_SUFFIX));
    let Some(document) = documents.next() else {
        return Err(RootsyncError::NoDocumentInArchive {
            path: path.to_path_buf(),
        });
    };
    if let Some(extra) = documents.next() {
        warn!(used = %document, ignored = %extra, "Package holds more than one document");
    }
    let document_path = scratch.path().join(document);

    let staged_images = staging_dir.map_or(0, |dir| stage_images(&members, scratch.path(), dir));

    Ok(ResolvedInput {
        document_path,
        extraction_root: Some(scratch.path().to_path_buf()),
        staged_images,
        scratch: Some(scratch),
    })
}

fn bare_document(path: &Path) -> ResolvedInput {
    ResolvedInput {
        document_path: path.to_path_buf(),
        extraction_root: None,
        staged_images: 0,
        scratch: None,
    }
}

/// Unpack every member of a gzip-compressed tar into `dest`.
///
/// Fails on the first member if the input is not a tar-in-gzip. A stream
/// that breaks after some members were unpacked keeps what was read.
fn unpack_archive(path: &Path, dest: &Path) -> std::io::Result<Vec<String>> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err) if members.is_empty() => return Err(err),
            Err(err) => {
                warn!(error = %err, "Truncated package; keeping members read so far");
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        if entry.unpack_in(dest)? {
            members.push(name);
        } else {
            warn!(member = %name, "Skipping package member outside the extraction root");
        }
    }

    Ok(members)
}

/// Copy image members into the staging area. Failures are logged and skipped.
fn stage_images(members: &[String], extraction_root: &Path, staging_dir: &Path) -> usize {
    if let Err(err) = fs::create_dir_all(staging_dir) {
        warn!(dir = %staging_dir.display(), error = %err, "Cannot create media staging area");
        return 0;
    }

    let mut staged = 0;
    for member in members.iter().filter(|m| is_image_name(m)) {
        let source = extraction_root.join(member);
        let Some(file_name) = source.file_name() else {
            continue;
        };
        let dest = staging_dir.join(file_name);
        if dest.exists() {
            debug!(file = %dest.display(), "Staged image already present");
            continue;
        }
        match fs::copy(&source, &dest) {
            Ok(_) => {
                debug!(member = %member, "Staged package image");
                staged += 1;
            }
            Err(err) => warn!(member = %member, error = %err, "Could not stage package image"),
        }
    }
    staged
}

/// Open a document for reading, decompressing gzip transparently.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn open_document(path: &Path) -> Result<Box<dyn BufRead>> {
    let mut magic = [0_u8; 2];
    let compressed = {
        let mut head = File::open(path)?;
        let read = head.read(&mut magic)?;
        read == GZIP_MAGIC.len() && magic == GZIP_MAGIC
    };

    let file = File::open(path)?;
    if compressed {
        debug!(path = %path.display(), "Reading gzip-compressed document");
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
