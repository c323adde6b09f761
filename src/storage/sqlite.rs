//! `SQLite` storage implementation.

use crate::error::{Result, RootsyncError};
use crate::model::{
    BatchStatus, Event, EventType, Family, FamilyChildLink, Gender, ImportBatch, MediaAsset, Note,
    NoteAttachment, Person, Place,
};
use crate::storage::schema::apply_schema;
use crate::util::{format_date, format_timestamp, parse_date, parse_timestamp};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Result of an update-or-create keyed by external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub created: bool,
    /// The row was inserted or at least one column changed.
    pub written: bool,
}

/// Import-owned person fields plus the source's change time.
#[derive(Debug, Clone)]
pub struct PersonImport<'a> {
    pub gramps_id: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub gender: Gender,
    pub changed_at: DateTime<Utc>,
}

/// Fields a web-layer edit may change. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct PersonEdit {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<Gender>,
    pub is_deceased: Option<bool>,
}

impl PersonEdit {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.gender.is_none()
            && self.is_deceased.is_none()
    }
}

/// A person-linked event, as seen by the derived-field sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VitalEvent {
    pub person_id: i64,
    pub event_type: EventType,
    pub date: Option<NaiveDate>,
}

/// Row counts per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub places: usize,
    pub persons: usize,
    pub families: usize,
    pub family_children: usize,
    pub events: usize,
    pub notes: usize,
    pub media: usize,
    pub import_batches: usize,
}

const PERSON_COLUMNS: &str = "id, gramps_id, first_name, last_name, gender, birth_date, death_date, \
     is_deceased, gramps_last_updated, created_at, updated_at";

const BATCH_COLUMNS: &str = "id, name, source_path, imported_at, status, summary_json, error";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{raw}'")))
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map_or(Ok(None), |raw| {
        parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{raw}'")))
    })
}

fn optional_date_column(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_date))
}

fn person_from_row(row: &Row) -> rusqlite::Result<Person> {
    let gender: String = row.get(4)?;
    Ok(Person {
        id: row.get(0)?,
        gramps_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        gender: Gender::from_gramps(&gender),
        birth_date: optional_date_column(row, 5)?,
        death_date: optional_date_column(row, 6)?,
        is_deceased: row.get(7)?,
        gramps_last_updated: optional_timestamp_column(row, 8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let event_type: String = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        gramps_id: row.get(1)?,
        event_type: EventType::from_gramps(&event_type),
        date: optional_date_column(row, 3)?,
        place_id: row.get(4)?,
        description: row.get(5)?,
        person_id: row.get(6)?,
        family_id: row.get(7)?,
    })
}

fn batch_from_row(row: &Row) -> rusqlite::Result<ImportBatch> {
    let status: String = row.get(4)?;
    Ok(ImportBatch {
        id: row.get(0)?,
        name: row.get(1)?,
        source_path: row.get(2)?,
        imported_at: timestamp_column(row, 3)?,
        status: status.parse().unwrap_or_default(),
        summary_json: row.get(5)?,
        error: row.get(6)?,
    })
}

fn count_to_usize(count: i64) -> usize {
    usize::try_from(count).unwrap_or(0)
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    fn find_id(&self, table: &str, gramps_id: &str) -> Result<Option<i64>> {
        let sql = format!("SELECT id FROM {table} WHERE gramps_id = ?");
        let id = self
            .conn
            .query_row(&sql, [gramps_id], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    // ========================================================================
    // RECONCILIATION (update-or-create keyed by gramps_id)
    // ========================================================================

    /// Update or create a place.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_place(
        &mut self,
        gramps_id: &str,
        name: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Upserted> {
        if let Some(id) = self.find_id("places", gramps_id)? {
            let changed = self.conn.execute(
                "UPDATE places SET name = ?1, latitude = ?2, longitude = ?3
                 WHERE id = ?4 AND (name IS NOT ?1 OR latitude IS NOT ?2 OR longitude IS NOT ?3)",
                params![name, latitude, longitude, id],
            )?;
            return Ok(Upserted {
                id,
                created: false,
                written: changed > 0,
            });
        }
        self.conn.execute(
            "INSERT INTO places (gramps_id, name, latitude, longitude) VALUES (?, ?, ?, ?)",
            params![gramps_id, name, latitude, longitude],
        )?;
        Ok(Upserted {
            id: self.conn.last_insert_rowid(),
            created: true,
            written: true,
        })
    }

    /// Update or create a person from import-owned fields.
    ///
    /// A new row gets `created_at = now` and both `updated_at` and
    /// `gramps_last_updated` set to the source change time. An existing row
    /// is written only when a name, the gender or the change time differs;
    /// `updated_at` then becomes the later of its stored value and the
    /// source change time, so a newer local edit stays visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_person(&mut self, person: &PersonImport<'_>) -> Result<Upserted> {
        let changed_at = format_timestamp(&person.changed_at);

        let Some(existing) = self.find_person_by_gramps_id(person.gramps_id)? else {
            let now = format_timestamp(&Utc::now());
            self.conn.execute(
                "INSERT INTO persons (gramps_id, first_name, last_name, gender,
                                      gramps_last_updated, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    person.gramps_id,
                    person.first_name,
                    person.last_name,
                    person.gender.as_str(),
                    changed_at,
                    now,
                    changed_at
                ],
            )?;
            return Ok(Upserted {
                id: self.conn.last_insert_rowid(),
                created: true,
                written: true,
            });
        };

        let differs = existing.first_name != person.first_name
            || existing.last_name != person.last_name
            || existing.gender != person.gender
            || existing.gramps_last_updated != Some(person.changed_at);

        if differs {
            let updated_at = existing.updated_at.max(person.changed_at);
            self.conn.execute(
                "UPDATE persons SET first_name = ?, last_name = ?, gender = ?,
                                    gramps_last_updated = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    person.first_name,
                    person.last_name,
                    person.gender.as_str(),
                    changed_at,
                    format_timestamp(&updated_at),
                    existing.id
                ],
            )?;
        }

        Ok(Upserted {
            id: existing.id,
            created: false,
            written: differs,
        })
    }

    /// Update or create a family with its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_family(
        &mut self,
        gramps_id: &str,
        father_id: Option<i64>,
        mother_id: Option<i64>,
    ) -> Result<Upserted> {
        if let Some(id) = self.find_id("families", gramps_id)? {
            let changed = self.conn.execute(
                "UPDATE families SET father_id = ?1, mother_id = ?2
                 WHERE id = ?3 AND (father_id IS NOT ?1 OR mother_id IS NOT ?2)",
                params![father_id, mother_id, id],
            )?;
            return Ok(Upserted {
                id,
                created: false,
                written: changed > 0,
            });
        }
        self.conn.execute(
            "INSERT INTO families (gramps_id, father_id, mother_id) VALUES (?, ?, ?)",
            params![gramps_id, father_id, mother_id],
        )?;
        Ok(Upserted {
            id: self.conn.last_insert_rowid(),
            created: true,
            written: true,
        })
    }

    /// Update or create an event. Person and family links are set by the linker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_event(
        &mut self,
        gramps_id: &str,
        event_type: EventType,
        date: Option<NaiveDate>,
        place_id: Option<i64>,
        description: &str,
    ) -> Result<Upserted> {
        let date = date.as_ref().map(format_date);
        if let Some(id) = self.find_id("events", gramps_id)? {
            let changed = self.conn.execute(
                "UPDATE events SET event_type = ?1, date = ?2, place_id = ?3, description = ?4
                 WHERE id = ?5 AND (event_type IS NOT ?1 OR date IS NOT ?2
                                    OR place_id IS NOT ?3 OR description IS NOT ?4)",
                params![event_type.as_str(), date, place_id, description, id],
            )?;
            return Ok(Upserted {
                id,
                created: false,
                written: changed > 0,
            });
        }
        self.conn.execute(
            "INSERT INTO events (gramps_id, event_type, date, place_id, description)
             VALUES (?, ?, ?, ?, ?)",
            params![gramps_id, event_type.as_str(), date, place_id, description],
        )?;
        Ok(Upserted {
            id: self.conn.last_insert_rowid(),
            created: true,
            written: true,
        })
    }

    /// Update or create a note's text. Attachment is set by the linker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_note(&mut self, gramps_id: &str, text: &str) -> Result<Upserted> {
        if let Some(id) = self.find_id("notes", gramps_id)? {
            let changed = self.conn.execute(
                "UPDATE notes SET text = ?1 WHERE id = ?2 AND text IS NOT ?1",
                params![text, id],
            )?;
            return Ok(Upserted {
                id,
                created: false,
                written: changed > 0,
            });
        }
        self.conn.execute(
            "INSERT INTO notes (gramps_id, text) VALUES (?, ?)",
            params![gramps_id, text],
        )?;
        Ok(Upserted {
            id: self.conn.last_insert_rowid(),
            created: true,
            written: true,
        })
    }

    /// Update or create a media asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_media(
        &mut self,
        gramps_id: &str,
        file_path: &str,
        mime_type: &str,
        description: &str,
    ) -> Result<Upserted> {
        if let Some(id) = self.find_id("media", gramps_id)? {
            let changed = self.conn.execute(
                "UPDATE media SET file_path = ?1, mime_type = ?2, description = ?3
                 WHERE id = ?4 AND (file_path IS NOT ?1 OR mime_type IS NOT ?2
                                    OR description IS NOT ?3)",
                params![file_path, mime_type, description, id],
            )?;
            return Ok(Upserted {
                id,
                created: false,
                written: changed > 0,
            });
        }
        self.conn.execute(
            "INSERT INTO media (gramps_id, file_path, mime_type, description) VALUES (?, ?, ?, ?)",
            params![gramps_id, file_path, mime_type, description],
        )?;
        Ok(Upserted {
            id: self.conn.last_insert_rowid(),
            created: true,
            written: true,
        })
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Replace a family's ordered child list in one transaction.
    ///
    /// Positions are assigned 0.. in slice order; a repeated child keeps its
    /// first position. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is changed then.
    pub fn replace_family_children(&mut self, family_id: i64, child_ids: &[i64]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM family_children WHERE family_id = ?",
            [family_id],
        )?;

        let mut seen = HashSet::new();
        let mut position: i64 = 0;
        for &child_id in child_ids {
            if !seen.insert(child_id) {
                continue;
            }
            tx.execute(
                "INSERT INTO family_children (family_id, child_id, position) VALUES (?, ?, ?)",
                params![family_id, child_id, position],
            )?;
            position += 1;
        }

        tx.commit()?;
        Ok(seen.len())
    }

    /// Point an event at a person unless it already does.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn set_event_person(&mut self, event_id: i64, person_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE events SET person_id = ?1 WHERE id = ?2 AND person_id IS NOT ?1",
            params![person_id, event_id],
        )?;
        Ok(changed > 0)
    }

    /// Point an event at a family unless it already does.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn set_event_family(&mut self, event_id: i64, family_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE events SET family_id = ?1 WHERE id = ?2 AND family_id IS NOT ?1",
            params![family_id, event_id],
        )?;
        Ok(changed > 0)
    }

    /// Set a note's single owner unless it already matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn set_note_attachment(&mut self, note_id: i64, attachment: NoteAttachment) -> Result<bool> {
        let (person_id, family_id, event_id) = attachment.columns();
        let changed = self.conn.execute(
            "UPDATE notes SET person_id = ?1, family_id = ?2, event_id = ?3
             WHERE id = ?4
               AND (person_id IS NOT ?1 OR family_id IS NOT ?2 OR event_id IS NOT ?3)",
            params![person_id, family_id, event_id, note_id],
        )?;
        Ok(changed > 0)
    }

    /// Ordered media ids associated with a person.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_person_media_ids(&self, person_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT media_id FROM person_media WHERE person_id = ? ORDER BY position, media_id",
        )?;
        let ids = stmt
            .query_map([person_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Replace a person's media set in full, preserving order.
    ///
    /// Duplicates keep their first position. Returns `false` without writing
    /// when the stored set already matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is changed then.
    pub fn replace_person_media(&mut self, person_id: i64, media_ids: &[i64]) -> Result<bool> {
        let mut seen = HashSet::new();
        let desired: Vec<i64> = media_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if self.get_person_media_ids(person_id)? == desired {
            return Ok(false);
        }

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM person_media WHERE person_id = ?", [person_id])?;
        for (position, media_id) in desired.iter().enumerate() {
            tx.execute(
                "INSERT INTO person_media (person_id, media_id, position) VALUES (?, ?, ?)",
                params![person_id, media_id, i64::try_from(position).unwrap_or(i64::MAX)],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Append one media association unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn add_person_media(&mut self, person_id: i64, media_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO person_media (person_id, media_id, position)
             SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0)
               FROM person_media WHERE person_id = ?1",
            params![person_id, media_id],
        )?;
        Ok(inserted > 0)
    }

    // ========================================================================
    // DERIVED FIELDS
    // ========================================================================

    /// All events linked to a person, in event id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_person_linked_events(&self) -> Result<Vec<VitalEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT person_id, event_type, date FROM events
              WHERE person_id IS NOT NULL ORDER BY id",
        )?;
        let events = stmt
            .query_map([], |row| {
                let event_type: String = row.get(1)?;
                Ok(VitalEvent {
                    person_id: row.get(0)?,
                    event_type: EventType::from_gramps(&event_type),
                    date: optional_date_column(row, 2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Write birth/death/deceased for a person if any differ.
    ///
    /// Leaves `updated_at` untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn update_person_vitals(
        &mut self,
        person_id: i64,
        birth_date: Option<NaiveDate>,
        death_date: Option<NaiveDate>,
        is_deceased: bool,
    ) -> Result<bool> {
        let birth = birth_date.as_ref().map(format_date);
        let death = death_date.as_ref().map(format_date);
        let changed = self.conn.execute(
            "UPDATE persons SET birth_date = ?1, death_date = ?2, is_deceased = ?3
             WHERE id = ?4
               AND (birth_date IS NOT ?1 OR death_date IS NOT ?2 OR is_deceased IS NOT ?3)",
            params![birth, death, is_deceased, person_id],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Get a person by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?");
        let person = self
            .conn
            .query_row(&sql, [id], person_from_row)
            .optional()?;
        Ok(person)
    }

    /// Find a person by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_person_by_gramps_id(&self, gramps_id: &str) -> Result<Option<Person>> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE gramps_id = ?");
        let result = self.conn.query_row(&sql, [gramps_id], person_from_row);
        match result {
            Ok(person) => Ok(Some(person)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RootsyncError::Database(e)),
        }
    }

    /// All persons ordered by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_persons(&self) -> Result<Vec<Person>> {
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY gramps_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let persons = stmt
            .query_map([], person_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(persons)
    }

    /// All person external ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_person_gramps_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT gramps_id FROM persons ORDER BY gramps_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Persons carrying edits newer than their last synchronisation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_locally_modified_persons(&self) -> Result<Vec<Person>> {
        Ok(self
            .list_persons()?
            .into_iter()
            .filter(Person::has_local_modifications)
            .collect())
    }

    /// Find a place by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_place_by_gramps_id(&self, gramps_id: &str) -> Result<Option<Place>> {
        let place = self
            .conn
            .query_row(
                "SELECT id, gramps_id, name, latitude, longitude FROM places WHERE gramps_id = ?",
                [gramps_id],
                |row| {
                    Ok(Place {
                        id: row.get(0)?,
                        gramps_id: row.get(1)?,
                        name: row.get(2)?,
                        latitude: row.get(3)?,
                        longitude: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(place)
    }

    /// Find a family by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_family_by_gramps_id(&self, gramps_id: &str) -> Result<Option<Family>> {
        let family = self
            .conn
            .query_row(
                "SELECT id, gramps_id, father_id, mother_id FROM families WHERE gramps_id = ?",
                [gramps_id],
                |row| {
                    Ok(Family {
                        id: row.get(0)?,
                        gramps_id: row.get(1)?,
                        father_id: row.get(2)?,
                        mother_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(family)
    }

    /// Families in which the person is father or mother.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_families_as_parent(&self, person_id: i64) -> Result<Vec<Family>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, gramps_id, father_id, mother_id FROM families
              WHERE father_id = ?1 OR mother_id = ?1 ORDER BY gramps_id",
        )?;
        let families = stmt
            .query_map([person_id], |row| {
                Ok(Family {
                    id: row.get(0)?,
                    gramps_id: row.get(1)?,
                    father_id: row.get(2)?,
                    mother_id: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(families)
    }

    /// Families in which the person is a child.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_families_as_child(&self, person_id: i64) -> Result<Vec<Family>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.gramps_id, f.father_id, f.mother_id
               FROM families f JOIN family_children fc ON fc.family_id = f.id
              WHERE fc.child_id = ? ORDER BY f.gramps_id",
        )?;
        let families = stmt
            .query_map([person_id], |row| {
                Ok(Family {
                    id: row.get(0)?,
                    gramps_id: row.get(1)?,
                    father_id: row.get(2)?,
                    mother_id: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(families)
    }

    /// A family's child links in default order: position, then birth date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_family_children(&self, family_id: i64) -> Result<Vec<FamilyChildLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT fc.family_id, fc.child_id, fc.position
               FROM family_children fc JOIN persons p ON p.id = fc.child_id
              WHERE fc.family_id = ?
              ORDER BY fc.position, p.birth_date IS NULL, p.birth_date",
        )?;
        let links = stmt
            .query_map([family_id], |row| {
                Ok(FamilyChildLink {
                    family_id: row.get(0)?,
                    child_id: row.get(1)?,
                    order: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Find an event by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_event_by_gramps_id(&self, gramps_id: &str) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                "SELECT id, gramps_id, event_type, date, place_id, description, person_id, family_id
                   FROM events WHERE gramps_id = ?",
                [gramps_id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    /// Events linked to a person, in event id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_person_events(&self, person_id: i64) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, gramps_id, event_type, date, place_id, description, person_id, family_id
               FROM events WHERE person_id = ? ORDER BY id",
        )?;
        let events = stmt
            .query_map([person_id], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Find a note by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_note_by_gramps_id(&self, gramps_id: &str) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                "SELECT id, gramps_id, text, person_id, family_id, event_id
                   FROM notes WHERE gramps_id = ?",
                [gramps_id],
                |row| {
                    Ok(Note {
                        id: row.get(0)?,
                        gramps_id: row.get(1)?,
                        text: row.get(2)?,
                        attachment: NoteAttachment::from_columns(
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ),
                    })
                },
            )
            .optional()?;
        Ok(note)
    }

    /// Find a media asset by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_media_by_gramps_id(&self, gramps_id: &str) -> Result<Option<MediaAsset>> {
        let media = self
            .conn
            .query_row(
                "SELECT id, gramps_id, file_path, mime_type, description
                   FROM media WHERE gramps_id = ?",
                [gramps_id],
                |row| {
                    Ok(MediaAsset {
                        id: row.get(0)?,
                        gramps_id: row.get(1)?,
                        file_path: row.get(2)?,
                        mime_type: row.get(3)?,
                        description: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(media)
    }

    /// Media associated with a person, in association order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_person_media(&self, person_id: i64) -> Result<Vec<MediaAsset>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.gramps_id, m.file_path, m.mime_type, m.description
               FROM media m JOIN person_media pm ON pm.media_id = m.id
              WHERE pm.person_id = ? ORDER BY pm.position, m.id",
        )?;
        let media = stmt
            .query_map([person_id], |row| {
                Ok(MediaAsset {
                    id: row.get(0)?,
                    gramps_id: row.get(1)?,
                    file_path: row.get(2)?,
                    mime_type: row.get(3)?,
                    description: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(media)
    }

    /// Row counts for every entity table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn entity_counts(&self) -> Result<EntityCounts> {
        let count = |table: &str| -> Result<usize> {
            let sql = format!("SELECT count(*) FROM {table}");
            let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count_to_usize(n))
        };
        Ok(EntityCounts {
            places: count("places")?,
            persons: count("persons")?,
            families: count("families")?,
            family_children: count("family_children")?,
            events: count("events")?,
            notes: count("notes")?,
            media: count("media")?,
            import_batches: count("import_batches")?,
        })
    }

    // ========================================================================
    // WEB-LAYER EDITS
    // ========================================================================

    /// Apply a web-layer edit to a person and advance `updated_at` to now.
    ///
    /// Never touches `gramps_id` or `gramps_last_updated`.
    ///
    /// # Errors
    ///
    /// Returns `PersonNotFound` if no person has this external id, or a
    /// database error.
    pub fn update_person_details(&mut self, gramps_id: &str, edit: &PersonEdit) -> Result<Person> {
        let person = self
            .find_person_by_gramps_id(gramps_id)?
            .ok_or_else(|| RootsyncError::PersonNotFound {
                gramps_id: gramps_id.to_string(),
            })?;

        let first_name = edit.first_name.as_deref().unwrap_or(&person.first_name);
        let last_name = edit.last_name.as_deref().unwrap_or(&person.last_name);
        let gender = edit.gender.unwrap_or(person.gender);
        let is_deceased = edit.is_deceased.unwrap_or(person.is_deceased);

        self.conn.execute(
            "UPDATE persons SET first_name = ?, last_name = ?, gender = ?, is_deceased = ?,
                                updated_at = ?
             WHERE id = ?",
            params![
                first_name,
                last_name,
                gender.as_str(),
                is_deceased,
                format_timestamp(&Utc::now()),
                person.id
            ],
        )?;

        self.get_person(person.id)?
            .ok_or_else(|| RootsyncError::PersonNotFound {
                gramps_id: gramps_id.to_string(),
            })
    }

    // ========================================================================
    // IMPORT BATCHES
    // ========================================================================

    /// Record a new pending import batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn create_import_batch(&mut self, name: &str, source_path: &str) -> Result<ImportBatch> {
        let imported_at = Utc::now();
        self.conn.execute(
            "INSERT INTO import_batches (name, source_path, imported_at, status)
             VALUES (?, ?, ?, ?)",
            params![
                name,
                source_path,
                format_timestamp(&imported_at),
                BatchStatus::Pending.as_str()
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_import_batch(id)?
            .ok_or(RootsyncError::BatchNotFound { id })
    }

    /// Record the outcome of a batch.
    ///
    /// # Errors
    ///
    /// Returns `BatchNotFound` if the batch does not exist, or a database error.
    pub fn finish_import_batch(
        &mut self,
        id: i64,
        status: BatchStatus,
        summary_json: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE import_batches SET status = ?, summary_json = ?, error = ? WHERE id = ?",
            params![status.as_str(), summary_json, error, id],
        )?;
        if updated == 0 {
            return Err(RootsyncError::BatchNotFound { id });
        }
        Ok(())
    }

    /// Get one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_import_batch(&self, id: i64) -> Result<Option<ImportBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = ?");
        let batch = self.conn.query_row(&sql, [id], batch_from_row).optional()?;
        Ok(batch)
    }

    /// Batches newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_import_batches(&self, limit: usize) -> Result<Vec<ImportBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM import_batches ORDER BY id DESC LIMIT ?");
        let mut stmt = self.conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let batches = stmt
            .query_map([limit], batch_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    /// Get a metadata value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let result =
            self.conn
                .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                    row.get(0)
                });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RootsyncError::Database(e)),
        }
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn changed(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn import<'a>(gramps_id: &'a str, first: &'a str, at: DateTime<Utc>) -> PersonImport<'a> {
        PersonImport {
            gramps_id,
            first_name: first,
            last_name: "Lovelace",
            gender: Gender::Female,
            changed_at: at,
        }
    }

    #[test]
    fn test_open_file_database() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree.db");
        {
            let mut storage = SqliteStorage::open_with_timeout(&path, Some(500)).unwrap();
            storage.set_metadata("k", "v").unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get_metadata("k").unwrap().as_deref(), Some("v"));
        assert_eq!(storage.get_metadata("missing").unwrap(), None);
    }

    #[test]
    fn test_upsert_person_create_then_update() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let first = storage
            .upsert_person(&import("I0001", "Ada", changed(1_000)))
            .unwrap();
        assert!(first.created);

        let person = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        assert_eq!(person.gramps_last_updated, Some(changed(1_000)));
        assert_eq!(person.updated_at, changed(1_000));
        assert!(!person.has_local_modifications());

        let second = storage
            .upsert_person(&import("I0001", "Augusta", changed(2_000)))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(!second.created);
        assert!(second.written);

        let third = storage
            .upsert_person(&import("I0001", "Augusta", changed(2_000)))
            .unwrap();
        assert!(!third.written);

        let person = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        assert_eq!(person.first_name, "Augusta");
        assert_eq!(person.updated_at, changed(2_000));
        assert!(!person.has_local_modifications());
    }

    #[test]
    fn test_upsert_person_keeps_newer_local_edit_visible() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .upsert_person(&import("I0001", "Ada", changed(1_000)))
            .unwrap();

        let edit = PersonEdit {
            last_name: Some("King".to_string()),
            ..PersonEdit::default()
        };
        let edited = storage.update_person_details("I0001", &edit).unwrap();
        assert!(edited.has_local_modifications());
        assert_eq!(edited.gramps_id, "I0001");

        storage
            .upsert_person(&import("I0001", "Ada", changed(1_000)))
            .unwrap();
        let person = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        assert_eq!(person.last_name, "Lovelace");
        assert!(person.has_local_modifications());

        let later = Utc::now() + Duration::hours(1);
        storage
            .upsert_person(&import("I0001", "Ada", later))
            .unwrap();
        let person = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        assert!(!person.has_local_modifications());
    }

    #[test]
    fn test_unchanged_person_is_not_rewritten() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .upsert_person(&import("I0001", "Ada", changed(1_000)))
            .unwrap();
        let before = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        storage
            .upsert_person(&import("I0001", "Ada", changed(1_000)))
            .unwrap();
        let after = storage.find_person_by_gramps_id("I0001").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_replace_family_children_replaces_in_full() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let ids: Vec<i64> = ["I1", "I2", "I3"]
            .iter()
            .map(|id| {
                storage
                    .upsert_person(&import(id, "C", changed(10)))
                    .unwrap()
                    .id
            })
            .collect();
        let family = storage.upsert_family("F1", None, None).unwrap();

        storage
            .replace_family_children(family.id, &[ids[2], ids[0], ids[1]])
            .unwrap();
        storage
            .replace_family_children(family.id, &[ids[0], ids[1], ids[0]])
            .unwrap();

        let links = storage.get_family_children(family.id).unwrap();
        let order: Vec<(i64, i64)> = links.iter().map(|l| (l.child_id, l.order)).collect();
        assert_eq!(order, vec![(ids[0], 0), (ids[1], 1)]);
        assert_eq!(storage.entity_counts().unwrap().family_children, 2);
    }

    #[test]
    fn test_idempotent_event_links() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let person = storage
            .upsert_person(&import("I1", "A", changed(10)))
            .unwrap();
        let event = storage
            .upsert_event("E1", EventType::Birth, None, None, "")
            .unwrap();

        assert!(storage.set_event_person(event.id, person.id).unwrap());
        assert!(!storage.set_event_person(event.id, person.id).unwrap());

        let family = storage.upsert_family("F1", Some(person.id), None).unwrap();
        assert!(storage.set_event_family(event.id, family.id).unwrap());
        assert!(!storage.set_event_family(event.id, family.id).unwrap());

        let stored = storage.find_event_by_gramps_id("E1").unwrap().unwrap();
        assert_eq!(stored.person_id, Some(person.id));
        assert_eq!(stored.family_id, Some(family.id));
    }

    #[test]
    fn test_note_attachment_moves_between_owners() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let person = storage
            .upsert_person(&import("I1", "A", changed(10)))
            .unwrap();
        let family = storage.upsert_family("F1", None, None).unwrap();
        let note = storage.upsert_note("N1", "text").unwrap();

        assert!(
            storage
                .set_note_attachment(note.id, NoteAttachment::Person(person.id))
                .unwrap()
        );
        assert!(
            !storage
                .set_note_attachment(note.id, NoteAttachment::Person(person.id))
                .unwrap()
        );
        assert!(
            storage
                .set_note_attachment(note.id, NoteAttachment::Family(family.id))
                .unwrap()
        );

        let stored = storage.find_note_by_gramps_id("N1").unwrap().unwrap();
        assert_eq!(stored.attachment, NoteAttachment::Family(family.id));
    }

    #[test]
    fn test_replace_person_media_skips_unchanged() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let person = storage
            .upsert_person(&import("I1", "A", changed(10)))
            .unwrap();
        let m1 = storage.upsert_media("O1", "a.jpg", "image/jpeg", "").unwrap();
        let m2 = storage.upsert_media("O2", "b.jpg", "image/jpeg", "").unwrap();

        assert!(storage.replace_person_media(person.id, &[m2.id, m1.id, m2.id]).unwrap());
        assert!(!storage.replace_person_media(person.id, &[m2.id, m1.id]).unwrap());
        assert_eq!(storage.get_person_media_ids(person.id).unwrap(), vec![m2.id, m1.id]);

        assert!(storage.replace_person_media(person.id, &[]).unwrap());
        assert!(storage.get_person_media(person.id).unwrap().is_empty());
    }

    #[test]
    fn test_add_person_media_appends_once() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let person = storage
            .upsert_person(&import("I1", "A", changed(10)))
            .unwrap();
        let m1 = storage.upsert_media("O1", "a.jpg", "image/jpeg", "").unwrap();
        let m2 = storage.upsert_media("O2", "b.jpg", "image/jpeg", "").unwrap();

        storage.replace_person_media(person.id, &[m1.id]).unwrap();
        assert!(storage.add_person_media(person.id, m2.id).unwrap());
        assert!(!storage.add_person_media(person.id, m2.id).unwrap());
        assert_eq!(storage.get_person_media_ids(person.id).unwrap(), vec![m1.id, m2.id]);
    }

    #[test]
    fn test_update_person_vitals_only_when_changed() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let person = storage
            .upsert_person(&import("I1", "A", changed(10)))
            .unwrap();
        let birth = NaiveDate::from_ymd_opt(1815, 12, 10);

        assert!(storage.update_person_vitals(person.id, birth, None, true).unwrap());
        assert!(!storage.update_person_vitals(person.id, birth, None, true).unwrap());

        let stored = storage.get_person(person.id).unwrap().unwrap();
        assert_eq!(stored.birth_date, birth);
        assert!(stored.is_deceased);
        assert_eq!(stored.updated_at, changed(10));
    }

    #[test]
    fn test_import_batch_lifecycle() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let first = storage.create_import_batch("one", "/tmp/one.gramps").unwrap();
        let second = storage.create_import_batch("two", "/tmp/two.gpkg").unwrap();
        assert_eq!(first.status, BatchStatus::Pending);

        storage
            .finish_import_batch(first.id, BatchStatus::Completed, Some("{}"), None)
            .unwrap();
        storage
            .finish_import_batch(second.id, BatchStatus::Failed, None, Some("boom"))
            .unwrap();

        let batches = storage.list_import_batches(10).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].name, "two");
        assert_eq!(batches[0].status, BatchStatus::Failed);
        assert_eq!(batches[0].error.as_deref(), Some("boom"));
        assert_eq!(batches[1].summary_json.as_deref(), Some("{}"));

        let missing = storage.finish_import_batch(999, BatchStatus::Failed, None, None);
        assert!(matches!(missing, Err(RootsyncError::BatchNotFound { id: 999 })));
    }

    #[test]
    fn test_update_person_details_unknown_person() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let result = storage.update_person_details("I404", &PersonEdit::default());
        assert!(matches!(result, Err(RootsyncError::PersonNotFound { .. })));
    }
}
