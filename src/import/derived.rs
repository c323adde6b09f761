//! Birth, death and deceased fields derived from linked events.

use crate::error::Result;
use crate::model::EventType;
use crate::storage::{SqliteStorage, VitalEvent};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Vitals {
    birth: Option<NaiveDate>,
    death: Option<NaiveDate>,
    has_death: bool,
}

fn collect(events: &[VitalEvent]) -> BTreeMap<i64, Vitals> {
    let mut by_person: BTreeMap<i64, Vitals> = BTreeMap::new();
    for event in events {
        let vitals = by_person.entry(event.person_id).or_default();
        match event.event_type {
            EventType::Birth => {
                if vitals.birth.is_none() {
                    vitals.birth = event.date;
                }
            }
            EventType::Death => {
                vitals.has_death = true;
                if vitals.death.is_none() {
                    vitals.death = event.date;
                }
            }
            _ => {}
        }
    }
    by_person
}

/// Sweep person-linked events once and refresh each person's vitals.
///
/// Dates found on events replace stored ones; a person with no dated event
/// of a kind keeps the stored date. A death event of any kind marks the
/// person deceased. Returns how many persons were written.
///
/// # Errors
///
/// Returns an error if a database query or write fails.
pub fn update_derived_fields(storage: &mut SqliteStorage) -> Result<usize> {
    let events = storage.list_person_linked_events()?;
    let mut written = 0;

    for (person_id, vitals) in collect(&events) {
        let Some(person) = storage.get_person(person_id)? else {
            continue;
        };
        let birth = vitals.birth.or(person.birth_date);
        let death = vitals.death.or(person.death_date);
        let deceased = person.is_deceased || vitals.has_death;
        if storage.update_person_vitals(person_id, birth, death, deceased)? {
            debug!(gramps_id = %person.gramps_id, "Updated derived fields");
            written += 1;
        }
    }

    Ok(written)
}
