//! Gramps XML import pipeline.
//!
//! A run resolves the input (package or bare document), parses it into
//! memory, reconciles every record by Gramps id, applies cross-entity links,
//! refreshes derived person fields and optionally associates loose images.
//! Every step is idempotent, so an interrupted run is repaired by running
//! it again.

pub mod archive;
pub mod derived;
pub mod link;
pub mod loose;
pub mod media;
pub mod parser;
pub mod reconcile;

pub use archive::{ResolvedInput, resolve_input};
pub use media::{MediaOutcome, MediaResolver};
pub use parser::{GRAMPS_NS, GrampsDocument, parse_file, parse_str};

use crate::error::Result;
use crate::storage::{SqliteStorage, Upserted};
use crate::util::format_timestamp;
use crate::util::progress::ProgressTracker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span};

/// Subfolder of the media root that receives copied files.
pub const DEFAULT_MEDIA_SUBFOLDER: &str = "imported";

/// Subfolder of the media root that receives images from packages.
pub const STAGING_SUBFOLDER: &str = "staging";

/// Metadata key holding the time of the last successful import.
pub const LAST_IMPORT_KEY: &str = "last_import_time";

/// Knobs for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Managed media root; stored media paths are relative to it.
    pub media_root: PathBuf,
    pub media_subfolder: String,
    /// Directory the Gramps media paths were recorded against.
    pub gramps_media_base: Option<PathBuf>,
    /// Directory to scan for loose images after the main pass.
    pub loose_media_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl ImportOptions {
    #[must_use]
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            media_subfolder: DEFAULT_MEDIA_SUBFOLDER.to_string(),
            gramps_media_base: None,
            loose_media_dir: None,
            show_progress: false,
        }
    }

    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.media_root.join(STAGING_SUBFOLDER)
    }
}

/// Record outcomes for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub parsed: usize,
    pub created: usize,
    /// Existing rows with at least one changed column.
    pub updated: usize,
    /// Existing rows that already matched the document.
    pub unchanged: usize,
    /// Records without a Gramps id.
    pub skipped: usize,
}

impl KindCounts {
    pub(crate) fn record(&mut self, upserted: Upserted) {
        if upserted.created {
            self.created += 1;
        } else if upserted.written {
            self.updated += 1;
        } else {
            self.unchanged += 1;
        }
    }

    /// Records reconciled into the database, whether or not they changed.
    #[must_use]
    pub const fn imported(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Link writes that changed a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounts {
    pub event_person: usize,
    pub event_family: usize,
    pub notes_attached: usize,
    /// Child rows written by the family child-list replace.
    pub child_links: usize,
    pub media_sets_replaced: usize,
}

/// Media file resolution outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub copied: usize,
    pub reused: usize,
    pub already_managed: usize,
    pub unresolved: usize,
}

/// Everything one import run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub places: KindCounts,
    pub people: KindCounts,
    pub families: KindCounts,
    pub events: KindCounts,
    pub notes: KindCounts,
    pub media: KindCounts,
    pub links: LinkCounts,
    pub files: MediaCounts,
    /// Persons whose birth, death or deceased fields changed.
    pub derived_updates: usize,
    pub loose_associated: usize,
    pub from_archive: bool,
    pub staged_images: usize,
}

impl ImportSummary {
    /// Aggregate (kind, imported) counts in reporting order.
    #[must_use]
    pub fn imported_counts(&self) -> [(&'static str, usize); 6] {
        [
            ("people", self.people.imported()),
            ("families", self.families.imported()),
            ("events", self.events.imported()),
            ("places", self.places.imported()),
            ("notes", self.notes.imported()),
            ("media", self.media.imported()),
        ]
    }
}

/// Directories searched for recorded media paths, before the managed root.
fn search_dirs(input: &Path, resolved: &ResolvedInput, options: &ImportOptions) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(parent) = resolved.document_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    if let Some(root) = &resolved.extraction_root {
        dirs.push(root.clone());
        dirs.push(options.staging_dir());
    }
    if let Some(parent) = input.parent() {
        dirs.push(parent.to_path_buf());
    }
    if let Some(base) = &options.gramps_media_base {
        dirs.push(base.clone());
    }
    dirs
}

/// Import the Gramps file at `input` into `storage`.
///
/// # Errors
///
/// Returns `InputNotFound` or `NoDocumentInArchive` for unusable input,
/// `DocumentParse` when the document cannot be read, and database errors
/// from any write. Writes made before a failure stay committed.
pub fn run_import(
    storage: &mut SqliteStorage,
    input: &Path,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let span = info_span!("import", input = %input.display());
    let _guard = span.enter();

    let staging = options.staging_dir();
    let spinner = ProgressTracker::new_spinner("Reading Gramps file", options.show_progress);
    let resolved = resolve_input(input, Some(&staging))?;
    let doc = parse_file(&resolved.document_path)?;
    spinner.finish_and_clear();

    let mut summary = ImportSummary {
        from_archive: resolved.is_archive(),
        staged_images: resolved.staged_images,
        ..ImportSummary::default()
    };

    let resolver = MediaResolver::new(
        search_dirs(input, &resolved, options),
        &options.media_root,
        &options.media_subfolder,
    );
    debug!(dirs = ?resolver.candidates(), "Media search directories");

    let progress = ProgressTracker::new(
        u64::try_from(doc.record_count()).unwrap_or(u64::MAX),
        "Reconciling",
        options.show_progress,
    );
    let rows = reconcile::reconcile(storage, &doc, &resolver, &mut summary, &progress)?;
    progress.finish_and_clear();

    let child_links = summary.links.child_links;
    summary.links = link::apply_links(storage, &doc, &rows)?;
    summary.links.child_links = child_links;

    summary.derived_updates = derived::update_derived_fields(storage)?;

    if let Some(dir) = &options.loose_media_dir {
        summary.loose_associated =
            loose::associate_loose_media(storage, dir, &resolver, &mut summary.files)?;
    }

    storage.set_metadata(LAST_IMPORT_KEY, &format_timestamp(&Utc::now()))?;

    info!(
        people = summary.people.imported(),
        families = summary.families.imported(),
        events = summary.events.imported(),
        places = summary.places.imported(),
        notes = summary.notes.imported(),
        media = summary.media.imported(),
        "Import complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_kind_counts_record() {
        let mut counts = KindCounts::default();
        counts.record(Upserted { id: 1, created: true, written: true });
        counts.record(Upserted { id: 2, created: false, written: true });
        counts.record(Upserted { id: 3, created: false, written: false });
        assert_eq!((counts.created, counts.updated, counts.unchanged), (1, 1, 1));
        assert_eq!(counts.imported(), 3);
    }

    #[test]
    fn test_run_import_missing_input() {
        let temp = TempDir::new().unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let options = ImportOptions::new(temp.path().join("media"));
        let err = run_import(&mut storage, &temp.path().join("missing.gramps"), &options)
            .unwrap_err();
        assert!(matches!(err, crate::error::RootsyncError::InputNotFound { .. }));
        assert_eq!(storage.get_metadata(LAST_IMPORT_KEY).unwrap(), None);
    }

    #[test]
    fn test_run_import_records_last_import_time() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("tree.gramps");
        fs::write(
            &input,
            format!(r#"<database xmlns="{GRAMPS_NS}"><people><person handle="_a" id="I1"/></people></database>"#),
        )
        .unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let options = ImportOptions::new(temp.path().join("media"));

        let summary = run_import(&mut storage, &input, &options).unwrap();
        assert_eq!(summary.people.created, 1);
        assert!(!summary.from_archive);
        assert!(storage.get_metadata(LAST_IMPORT_KEY).unwrap().is_some());
    }
}
