//! Cross-entity links that need both endpoints persisted.
//!
//! Every write is conditional, so linking an unchanged document touches no
//! rows. Owners are visited in document order; when two owners reference the
//! same event or note, the later one wins.

use crate::error::Result;
use crate::import::loose::is_loose_media_id;
use crate::import::parser::{GrampsDocument, RefTable};
use crate::import::reconcile::{HandleMap, Reconciled};
use crate::import::LinkCounts;
use crate::model::NoteAttachment;
use crate::storage::SqliteStorage;
use std::collections::HashMap;
use tracing::debug;

fn targets<'a>(table: &'a RefTable, owner: &str) -> impl Iterator<Item = &'a String> {
    table.get(owner).into_iter().flatten()
}

/// Resolve `owner`'s references in `table` to row ids, dropping dangling ones.
fn resolved(table: &RefTable, owner: &str, rows: &HandleMap) -> Vec<i64> {
    targets(table, owner)
        .filter_map(|handle| {
            let id = rows.get(handle).copied();
            if id.is_none() {
                debug!(owner, target = %handle, "Dangling reference");
            }
            id
        })
        .collect()
}

/// Apply event, note and media links.
///
/// # Errors
///
/// Returns an error if a database write fails.
pub fn apply_links(
    storage: &mut SqliteStorage,
    doc: &GrampsDocument,
    rows: &Reconciled,
) -> Result<LinkCounts> {
    let mut counts = LinkCounts::default();
    let refs = &doc.refs;

    let owned_people = doc
        .people
        .iter()
        .filter_map(|p| rows.people.get(&p.handle).map(|&id| (p.handle.as_str(), id)))
        .collect::<Vec<_>>();
    let owned_families = doc
        .families
        .iter()
        .filter_map(|f| rows.families.get(&f.handle).map(|&id| (f.handle.as_str(), id)))
        .collect::<Vec<_>>();
    let owned_events = doc
        .events
        .iter()
        .filter_map(|e| rows.events.get(&e.handle).map(|&id| (e.handle.as_str(), id)))
        .collect::<Vec<_>>();

    // Last owner wins; each row is written at most once.
    let mut event_person: HashMap<i64, i64> = HashMap::new();
    for &(handle, person_id) in &owned_people {
        for event_id in resolved(&refs.person_events, handle, &rows.events) {
            event_person.insert(event_id, person_id);
        }
    }
    for (event_id, person_id) in event_person {
        if storage.set_event_person(event_id, person_id)? {
            counts.event_person += 1;
        }
    }

    let mut event_family: HashMap<i64, i64> = HashMap::new();
    for &(handle, family_id) in &owned_families {
        for event_id in resolved(&refs.family_events, handle, &rows.events) {
            event_family.insert(event_id, family_id);
        }
    }
    for (event_id, family_id) in event_family {
        if storage.set_event_family(event_id, family_id)? {
            counts.event_family += 1;
        }
    }

    let note_owners = owned_people
        .iter()
        .map(|&(h, id)| (&refs.person_notes, h, NoteAttachment::Person(id)))
        .chain(
            owned_families
                .iter()
                .map(|&(h, id)| (&refs.family_notes, h, NoteAttachment::Family(id))),
        )
        .chain(
            owned_events
                .iter()
                .map(|&(h, id)| (&refs.event_notes, h, NoteAttachment::Event(id))),
        );
    let mut note_attachments: HashMap<i64, NoteAttachment> = HashMap::new();
    for (table, handle, attachment) in note_owners {
        for note_id in resolved(table, handle, &rows.notes) {
            note_attachments.insert(note_id, attachment);
        }
    }
    for (note_id, attachment) in note_attachments {
        if storage.set_note_attachment(note_id, attachment)? {
            counts.notes_attached += 1;
        }
    }

    // Loose associations are not in the document; keep them after its set.
    for &(handle, person_id) in &owned_people {
        let mut media_ids = resolved(&refs.person_media, handle, &rows.media);
        media_ids.extend(
            storage
                .get_person_media(person_id)?
                .into_iter()
                .filter(|media| is_loose_media_id(&media.gramps_id))
                .map(|media| media.id),
        );
        if storage.replace_person_media(person_id, &media_ids)? {
            counts.media_sets_replaced += 1;
        }
    }

    debug!(?counts, "Applied links");
    Ok(counts)
}
