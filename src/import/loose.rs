//! Association of loose image files with people by file name.

use crate::error::Result;
use crate::import::media::{MediaOutcome, MediaResolver, is_image_name, mime_for_extension};
use crate::import::MediaCounts;
use crate::model::Person;
use crate::storage::SqliteStorage;
use crate::util::{dotted_extension, short_hash, to_slash_path};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const LOOSE_MARKER: &str = "_loose_";

const SKIPPED_DIRS: [&str; 4] = [".git", ".venv", "__pycache__", "node_modules"];

fn is_skipped_dir(entry: &DirEntry, managed_root: Option<&Path>) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
        return true;
    }
    managed_root.is_some_and(|root| entry.path().canonicalize().is_ok_and(|p| p == root))
}

/// Image files under `dir`, in sorted walk order.
fn scan_images(dir: &Path, managed_root: Option<&Path>) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry, managed_root))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable entry in loose media directory");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_image_name(&entry.file_name().to_string_lossy()))
        .map(DirEntry::into_path)
        .collect()
}

/// Pick the person a file name refers to.
///
/// A Gramps id contained in the name wins (the longest one when several
/// match); otherwise both first and last name must appear.
fn match_person<'a>(file_name: &str, people: &'a [Person]) -> Option<&'a Person> {
    let lower = file_name.to_lowercase();
    let by_id = people
        .iter()
        .filter(|p| !p.gramps_id.is_empty() && lower.contains(&p.gramps_id.to_lowercase()))
        .max_by_key(|p| p.gramps_id.len());
    by_id.or_else(|| {
        people.iter().find(|p| {
            !p.first_name.is_empty()
                && !p.last_name.is_empty()
                && lower.contains(&p.first_name.to_lowercase())
                && lower.contains(&p.last_name.to_lowercase())
        })
    })
}

/// Loose media id: person id plus a digest of the path relative to the scan root.
#[must_use]
pub fn loose_media_id(person_gramps_id: &str, relative_path: &str) -> String {
    format!("{person_gramps_id}{LOOSE_MARKER}{}", short_hash(relative_path, 8))
}

/// Whether a media id was minted by the loose scan.
#[must_use]
pub fn is_loose_media_id(gramps_id: &str) -> bool {
    gramps_id.contains(LOOSE_MARKER)
}

/// Scan `dir` for images and append each match to its person's media set.
///
/// Returns how many new associations were made. Re-running on the same tree
/// converges on the same media rows and files.
///
/// # Errors
///
/// Returns an error if a database query or write fails.
pub fn associate_loose_media(
    storage: &mut SqliteStorage,
    dir: &Path,
    resolver: &MediaResolver,
    files: &mut MediaCounts,
) -> Result<usize> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Loose media directory not found");
        return Ok(0);
    }

    let managed_root = resolver.media_root().canonicalize().ok();
    let images = scan_images(dir, managed_root.as_deref());
    let people = storage.list_persons()?;
    let mut associated = 0;

    for path in images {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(person) = match_person(&file_name, &people) else {
            debug!(file = %path.display(), "No person matches loose image");
            continue;
        };

        let relative = path.strip_prefix(dir).map_or_else(|_| file_name.clone(), to_slash_path);
        let Some(resolved) = resolver.manage(&path) else {
            files.unresolved += 1;
            continue;
        };
        match resolved.outcome {
            MediaOutcome::Copied => files.copied += 1,
            MediaOutcome::Reused => files.reused += 1,
            MediaOutcome::AlreadyManaged => files.already_managed += 1,
            MediaOutcome::Unresolved => files.unresolved += 1,
        }

        let mime = dotted_extension(&path).map_or("application/octet-stream", |ext| {
            mime_for_extension(&ext)
        });
        let description = format!("Photo of {}", person.full_name());
        let media = storage.upsert_media(
            &loose_media_id(&person.gramps_id, &relative),
            &resolved.stored_path,
            mime,
            &description,
        )?;
        if storage.add_person_media(person.id, media.id)? {
            debug!(gramps_id = %person.gramps_id, file = %relative, "Associated loose image");
            associated += 1;
        }
    }

    info!(associated, dir = %dir.display(), "Loose media scan complete");
    Ok(associated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;
    use crate::storage::PersonImport;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn add(storage: &mut SqliteStorage, gramps_id: &str, first: &str, last: &str) -> i64 {
        storage
            .upsert_person(&PersonImport {
                gramps_id,
                first_name: first,
                last_name: last,
                gender: Gender::Unknown,
                changed_at: Utc::now(),
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_loose_media_id_is_stable() {
        let a = loose_media_id("I0001", "photos/ada.jpg");
        assert_eq!(a, loose_media_id("I0001", "photos/ada.jpg"));
        assert!(a.starts_with("I0001_loose_"));
        assert_eq!(a.len(), "I0001_loose_".len() + 8);
        assert_ne!(a, loose_media_id("I0001", "photos/ada2.jpg"));
        assert!(is_loose_media_id(&a));
        assert!(!is_loose_media_id("O0001"));
    }

    #[test]
    fn test_associate_by_id_then_by_name() {
        let temp = TempDir::new().unwrap();
        let scan = temp.path().join("scan");
        let root = temp.path().join("media");
        fs::create_dir_all(scan.join("nested")).unwrap();
        fs::create_dir_all(scan.join(".hidden")).unwrap();
        fs::create_dir_all(scan.join("node_modules")).unwrap();
        fs::write(scan.join("i0010_portrait.JPG"), b"by id").unwrap();
        fs::write(scan.join("nested/grace_hopper_1950.png"), b"by name").unwrap();
        fs::write(scan.join("nobody.png"), b"x").unwrap();
        fs::write(scan.join(".hidden/I0001.png"), b"x").unwrap();
        fs::write(scan.join("node_modules/I0001.png"), b"x").unwrap();
        fs::write(scan.join("I0001.txt"), b"x").unwrap();

        let mut storage = SqliteStorage::open_memory().unwrap();
        let ada = add(&mut storage, "I0001", "Ada", "Lovelace");
        let ten = add(&mut storage, "I0010", "", "");
        let grace = add(&mut storage, "I0002", "Grace", "Hopper");

        let resolver = MediaResolver::new(Vec::new(), &root, "imported");
        let mut files = MediaCounts::default();
        let associated = associate_loose_media(&mut storage, &scan, &resolver, &mut files).unwrap();
        assert_eq!(associated, 2);
        assert_eq!(files.copied, 2);

        assert!(storage.get_person_media(ada).unwrap().is_empty());
        let ten_media = storage.get_person_media(ten).unwrap();
        assert_eq!(ten_media.len(), 1);
        assert_eq!(ten_media[0].mime_type, "image/jpeg");
        let grace_media = storage.get_person_media(grace).unwrap();
        assert_eq!(grace_media[0].description, "Photo of Grace Hopper");
        assert_eq!(grace_media[0].file_path, "imported/grace_hopper_1950.png");

        let again = associate_loose_media(&mut storage, &scan, &resolver, &mut files).unwrap();
        assert_eq!(again, 0);
        assert_eq!(files.reused, 2);
        assert_eq!(storage.entity_counts().unwrap().media, 2);
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let resolver = MediaResolver::new(Vec::new(), temp.path(), "imported");
        let mut files = MediaCounts::default();
        let n = associate_loose_media(&mut storage, &temp.path().join("nope"), &resolver, &mut files)
            .unwrap();
        assert_eq!(n, 0);
    }
}
