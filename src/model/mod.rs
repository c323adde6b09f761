//! Core data types for `rootsync`.
//!
//! These are the entities as persisted, not as they appear in a Gramps
//! document:
//! - `Place`, `Person`, `Family`, `Event`, `Note`, `MediaAsset` - reconciled records
//! - `FamilyChildLink` - ordered family/child join rows
//! - `ImportBatch` - one user-initiated import job

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum drift between `updated_at` and `gramps_last_updated` that still
/// counts as "in sync".
pub const LOCAL_MODIFICATION_TOLERANCE_SECS: i64 = 1;

/// Gender code as stored on a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[default]
    #[serde(rename = "U")]
    Unknown,
}

impl Gender {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Unknown => "U",
        }
    }

    /// Map free gender text to a code. Anything unrecognised is `Unknown`.
    #[must_use]
    pub fn from_gramps(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "M" => Self::Male,
            "F" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Gender {
    type Err = crate::error::RootsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M" | "MALE" => Ok(Self::Male),
            "F" | "FEMALE" => Ok(Self::Female),
            "U" | "UNKNOWN" => Ok(Self::Unknown),
            other => Err(crate::error::RootsyncError::validation(
                "gender",
                format!("expected M, F or U, got '{other}'"),
            )),
        }
    }
}

/// Closed set of event kinds the tree understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Birth,
    Death,
    Marriage,
    Divorce,
    Baptism,
    Burial,
    #[default]
    Unknown,
}

impl EventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Birth => "birth",
            Self::Death => "death",
            Self::Marriage => "marriage",
            Self::Divorce => "divorce",
            Self::Baptism => "baptism",
            Self::Burial => "burial",
            Self::Unknown => "unknown",
        }
    }

    /// Map Gramps event type text (any case) onto the closed set.
    #[must_use]
    pub fn from_gramps(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "birth" => Self::Birth,
            "death" => Self::Death,
            "marriage" => Self::Marriage,
            "divorce" => Self::Divorce,
            "baptism" => Self::Baptism,
            "burial" => Self::Burial,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reconciled place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: i64,
    pub gramps_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// A reconciled person.
///
/// `gramps_last_updated` is the source's own change time as of the last
/// import; `updated_at` moves on every write, including web-layer edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub gramps_id: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub death_date: Option<NaiveDate>,
    pub is_deceased: bool,
    pub gramps_last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// True when the row carries edits newer than the last synchronisation.
    ///
    /// A person that was never synchronised was created locally and so
    /// counts as modified.
    #[must_use]
    pub fn has_local_modifications(&self) -> bool {
        self.gramps_last_updated.is_none_or(|synced| {
            self.updated_at - synced > Duration::seconds(LOCAL_MODIFICATION_TOLERANCE_SECS)
        })
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.death_date.is_none() && !self.is_deceased
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A reconciled family. Children live in `FamilyChildLink` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: i64,
    pub gramps_id: String,
    pub father_id: Option<i64>,
    pub mother_id: Option<i64>,
}

/// Ordered membership of a child in a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyChildLink {
    pub family_id: i64,
    pub child_id: i64,
    pub order: i64,
}

/// A reconciled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub gramps_id: String,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub place_id: Option<i64>,
    pub description: String,
    pub person_id: Option<i64>,
    pub family_id: Option<i64>,
}

/// What a note hangs off. At most one owner at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NoteAttachment {
    #[default]
    Unattached,
    Person(i64),
    Family(i64),
    Event(i64),
}

impl NoteAttachment {
    /// Split into `(person_id, family_id, event_id)` columns.
    #[must_use]
    pub const fn columns(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match *self {
            Self::Unattached => (None, None, None),
            Self::Person(id) => (Some(id), None, None),
            Self::Family(id) => (None, Some(id), None),
            Self::Event(id) => (None, None, Some(id)),
        }
    }

    /// Rebuild from stored columns; the first non-null column wins.
    #[must_use]
    pub const fn from_columns(
        person_id: Option<i64>,
        family_id: Option<i64>,
        event_id: Option<i64>,
    ) -> Self {
        match (person_id, family_id, event_id) {
            (Some(id), _, _) => Self::Person(id),
            (None, Some(id), _) => Self::Family(id),
            (None, None, Some(id)) => Self::Event(id),
            (None, None, None) => Self::Unattached,
        }
    }
}

/// A reconciled note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub gramps_id: String,
    pub text: String,
    pub attachment: NoteAttachment,
}

/// A reconciled media object. `file_path` is relative to the managed media
/// root when resolved, or the normalised source path when not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: i64,
    pub gramps_id: String,
    pub file_path: String,
    pub mime_type: String,
    pub description: String,
}

/// Lifecycle of an import batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl BatchStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = crate::error::RootsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::RootsyncError::validation(
                "status",
                format!("unknown batch status '{other}'"),
            )),
        }
    }
}

/// One recorded import job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: i64,
    pub name: String,
    pub source_path: String,
    pub imported_at: DateTime<Utc>,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn person_at(updated: DateTime<Utc>, synced: Option<DateTime<Utc>>) -> Person {
        Person {
            id: 1,
            gramps_id: "I0001".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            gender: Gender::Female,
            birth_date: None,
            death_date: None,
            is_deceased: false,
            gramps_last_updated: synced,
            created_at: updated,
            updated_at: updated,
        }
    }

    #[test]
    fn gender_from_gramps_text() {
        assert_eq!(Gender::from_gramps("m"), Gender::Male);
        assert_eq!(Gender::from_gramps(" F "), Gender::Female);
        assert_eq!(Gender::from_gramps("X"), Gender::Unknown);
        assert_eq!(Gender::from_gramps(""), Gender::Unknown);
    }

    #[test]
    fn gender_from_str_rejects_garbage() {
        assert_eq!("female".parse::<Gender>().unwrap(), Gender::Female);
        assert!("q".parse::<Gender>().is_err());
    }

    #[test]
    fn event_type_mapping_is_case_insensitive() {
        assert_eq!(EventType::from_gramps("Birth"), EventType::Birth);
        assert_eq!(EventType::from_gramps("BURIAL"), EventType::Burial);
        assert_eq!(EventType::from_gramps("unknown-type"), EventType::Unknown);
        assert_eq!(EventType::from_gramps("Christening"), EventType::Unknown);
    }

    #[test]
    fn local_modification_tolerance() {
        let synced = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let same = person_at(synced, Some(synced));
        assert!(!same.has_local_modifications());

        let within = person_at(synced + Duration::seconds(1), Some(synced));
        assert!(!within.has_local_modifications());

        let beyond = person_at(synced + Duration::seconds(2), Some(synced));
        assert!(beyond.has_local_modifications());

        let older = person_at(synced - Duration::hours(1), Some(synced));
        assert!(!older.has_local_modifications());
    }

    #[test]
    fn never_synced_person_counts_as_modified() {
        let now = Utc::now();
        assert!(person_at(now, None).has_local_modifications());
    }

    #[test]
    fn is_alive_respects_flag_and_date() {
        let now = Utc::now();
        let mut person = person_at(now, Some(now));
        assert!(person.is_alive());
        person.is_deceased = true;
        assert!(!person.is_alive());
        person.is_deceased = false;
        person.death_date = NaiveDate::from_ymd_opt(1900, 1, 1);
        assert!(!person.is_alive());
    }

    #[test]
    fn note_attachment_columns_roundtrip() {
        let attachment = NoteAttachment::Family(7);
        let (p, f, e) = attachment.columns();
        assert_eq!((p, f, e), (None, Some(7), None));
        assert_eq!(NoteAttachment::from_columns(p, f, e), attachment);
        assert_eq!(
            NoteAttachment::from_columns(None, None, None),
            NoteAttachment::Unattached
        );
    }
}
