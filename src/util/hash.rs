//! SHA256 helpers for media files.
//!
//! Used to recognise an already-copied file on re-import and to derive
//! stable ids for loose media.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Hash a file's contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_digest(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// True when both files exist and have byte-identical contents.
///
/// # Errors
///
/// Returns an error if either file exists but cannot be read.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = (a.metadata()?, b.metadata()?);
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(file_digest(a)? == file_digest(b)?)
}

/// First `len` hex characters of the SHA256 of `text`.
#[must_use]
pub fn short_hash(text: &str, len: usize) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(len);
    hex
}
