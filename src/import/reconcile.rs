//! Update-or-create of every parsed record, keyed by Gramps id.
//!
//! Kinds are reconciled in dependency order: places and people first, then
//! families (which need people), events (which need places), notes and media.

use crate::error::Result;
use crate::import::media::{MediaOutcome, MediaResolver};
use crate::import::parser::GrampsDocument;
use crate::import::{ImportSummary, KindCounts};
use crate::storage::{PersonImport, SqliteStorage, Upserted};
use crate::util::progress::ProgressTracker;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Handle → row id for one entity kind.
pub type HandleMap = HashMap<String, i64>;

/// Row ids of everything reconciled in this run, by document handle.
#[derive(Debug, Default, Clone)]
pub struct Reconciled {
    pub places: HandleMap,
    pub people: HandleMap,
    pub families: HandleMap,
    pub events: HandleMap,
    pub notes: HandleMap,
    pub media: HandleMap,
    /// Reconciled person handles in document order.
    pub people_order: Vec<String>,
}

/// Records the outcome and remembers the row under its handle.
fn remember(map: &mut HandleMap, counts: &mut KindCounts, handle: &str, upserted: Upserted) {
    counts.record(upserted);
    if !handle.is_empty() {
        map.insert(handle.to_string(), upserted.id);
    }
}

fn lookup(map: &HandleMap, handle: Option<&str>) -> Option<i64> {
    handle.and_then(|h| map.get(h)).copied()
}

/// Reconcile every record of `doc` into `storage`.
///
/// # Errors
///
/// Returns an error if a database write fails.
pub fn reconcile(
    storage: &mut SqliteStorage,
    doc: &GrampsDocument,
    resolver: &MediaResolver,
    summary: &mut ImportSummary,
    progress: &ProgressTracker,
) -> Result<Reconciled> {
    let mut out = Reconciled::default();

    progress.set_message("places");
    for place in &doc.places {
        progress.inc(1);
        summary.places.parsed += 1;
        let Some(gramps_id) = place.gramps_id.as_deref() else {
            warn!(handle = %place.handle, "Skipping place without an id");
            summary.places.skipped += 1;
            continue;
        };
        let upserted =
            storage.upsert_place(gramps_id, &place.name, place.latitude, place.longitude)?;
        remember(&mut out.places, &mut summary.places, &place.handle, upserted);
    }

    progress.set_message("people");
    for person in &doc.people {
        progress.inc(1);
        summary.people.parsed += 1;
        let Some(gramps_id) = person.gramps_id.as_deref() else {
            warn!(handle = %person.handle, "Skipping person without an id");
            summary.people.skipped += 1;
            continue;
        };
        let upserted = storage.upsert_person(&PersonImport {
            gramps_id,
            first_name: &person.first_name,
            last_name: &person.last_name,
            gender: person.gender,
            changed_at: person.last_changed,
        })?;
        if upserted.created {
            debug!(gramps_id, "Created person");
        }
        remember(&mut out.people, &mut summary.people, &person.handle, upserted);
        if !person.handle.is_empty() {
            out.people_order.push(person.handle.clone());
        }
    }

    progress.set_message("families");
    for family in &doc.families {
        progress.inc(1);
        summary.families.parsed += 1;
        let Some(gramps_id) = family.gramps_id.as_deref() else {
            warn!(handle = %family.handle, "Skipping family without an id");
            summary.families.skipped += 1;
            continue;
        };
        let father = lookup(&out.people, family.father.as_deref());
        let mother = lookup(&out.people, family.mother.as_deref());
        let upserted = storage.upsert_family(gramps_id, father, mother)?;
        remember(&mut out.families, &mut summary.families, &family.handle, upserted);

        let mut children = Vec::with_capacity(family.children.len());
        for handle in &family.children {
            match out.people.get(handle) {
                Some(&child_id) => children.push(child_id),
                None => warn!(family = gramps_id, child = %handle, "Dropping unknown child reference"),
            }
        }
        summary.links.child_links += storage.replace_family_children(upserted.id, &children)?;
    }

    progress.set_message("events");
    for event in &doc.events {
        progress.inc(1);
        summary.events.parsed += 1;
        let Some(gramps_id) = event.gramps_id.as_deref() else {
            warn!(handle = %event.handle, "Skipping event without an id");
            summary.events.skipped += 1;
            continue;
        };
        let place_id = lookup(&out.places, event.place.as_deref());
        let upserted = storage.upsert_event(
            gramps_id,
            event.event_type,
            event.date,
            place_id,
            &event.description,
        )?;
        remember(&mut out.events, &mut summary.events, &event.handle, upserted);
    }

    progress.set_message("notes");
    for note in &doc.notes {
        progress.inc(1);
        summary.notes.parsed += 1;
        let Some(gramps_id) = note.gramps_id.as_deref() else {
            warn!(handle = %note.handle, "Skipping note without an id");
            summary.notes.skipped += 1;
            continue;
        };
        let upserted = storage.upsert_note(gramps_id, &note.text)?;
        remember(&mut out.notes, &mut summary.notes, &note.handle, upserted);
    }

    progress.set_message("media");
    for media in &doc.media {
        progress.inc(1);
        summary.media.parsed += 1;
        let Some(gramps_id) = media.gramps_id.as_deref() else {
            warn!(handle = %media.handle, "Skipping media object without an id");
            summary.media.skipped += 1;
            continue;
        };

        let upserted = match &media.file {
            Some(file) => {
                let resolved = match resolver.resolve(&file.src) {
                    unresolved if unresolved.outcome == MediaOutcome::Unresolved => storage
                        .find_media_by_gramps_id(gramps_id)?
                        .and_then(|existing| resolver.previous_copy(&existing.file_path))
                        .unwrap_or(unresolved),
                    resolved => resolved,
                };
                match resolved.outcome {
                    MediaOutcome::Copied => summary.files.copied += 1,
                    MediaOutcome::Reused => summary.files.reused += 1,
                    MediaOutcome::AlreadyManaged => summary.files.already_managed += 1,
                    MediaOutcome::Unresolved => {
                        if !file.src.trim().is_empty() {
                            warn!(gramps_id, src = %file.src, "Media file not found; keeping recorded path");
                        }
                        summary.files.unresolved += 1;
                    }
                }
                storage.upsert_media(
                    gramps_id,
                    &resolved.stored_path,
                    &file.mime,
                    &file.description,
                )?
            }
            None => {
                warn!(gramps_id, "Media object has no file element");
                storage.upsert_media(gramps_id, "", "", "")?
            }
        };
        remember(&mut out.media, &mut summary.media, &media.handle, upserted);
    }

    Ok(out)
}
