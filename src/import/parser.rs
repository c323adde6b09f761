//! Streaming Gramps XML parser.
//!
//! One pass over the document fills a [`GrampsDocument`]: a vector of
//! records per kind, a handle → index map per kind, and the handle-based
//! reference tables. Nothing here touches the database.

use crate::error::{Result, RootsyncError};
use crate::import::archive::open_document;
use crate::model::{EventType, Gender};
use crate::util::{parse_change_time, parse_coordinate, parse_gramps_date};
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

/// Namespace of the Gramps XML dialect this importer was written against.
pub const GRAMPS_NS: &str = "http://gramps-project.org/xml/1.7.2/";

/// Every Gramps XML version lives under this prefix.
const GRAMPS_NS_PREFIX: &str = "http://gramps-project.org/xml/";

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    pub father: Option<String>,
    pub mother: Option<String>,
    /// Child handles in source order.
    pub children: Vec<String>,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    pub event_type: EventType,
    pub date: Option<NaiveDate>,
    pub place: Option<String>,
    pub description: String,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    pub text: String,
    pub last_changed: DateTime<Utc>,
}

/// The `file` child of a media object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaFile {
    pub src: String,
    pub mime: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub handle: String,
    pub gramps_id: Option<String>,
    /// `None` when the object has no `file` child.
    pub file: Option<MediaFile>,
    pub last_changed: DateTime<Utc>,
}

/// Handle → referenced handles, in source order.
pub type RefTable = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefTables {
    pub person_events: RefTable,
    pub person_media: RefTable,
    pub person_notes: RefTable,
    pub family_events: RefTable,
    pub family_notes: RefTable,
    pub event_notes: RefTable,
}

/// In-memory snapshot of one Gramps document.
#[derive(Debug, Clone, Default)]
pub struct GrampsDocument {
    pub places: Vec<PlaceRecord>,
    pub people: Vec<PersonRecord>,
    pub families: Vec<FamilyRecord>,
    pub events: Vec<EventRecord>,
    pub notes: Vec<NoteRecord>,
    pub media: Vec<MediaRecord>,
    pub refs: RefTables,
    place_index: HashMap<String, usize>,
    person_index: HashMap<String, usize>,
    family_index: HashMap<String, usize>,
    event_index: HashMap<String, usize>,
    note_index: HashMap<String, usize>,
    media_index: HashMap<String, usize>,
}

fn index_by_handle<'a>(handles: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    handles
        .enumerate()
        .filter(|(_, handle)| !handle.is_empty())
        .map(|(idx, handle)| (handle.to_string(), idx))
        .collect()
}

impl GrampsDocument {
    fn build_indexes(&mut self) {
        self.place_index = index_by_handle(self.places.iter().map(|r| r.handle.as_str()));
        self.person_index = index_by_handle(self.people.iter().map(|r| r.handle.as_str()));
        self.family_index = index_by_handle(self.families.iter().map(|r| r.handle.as_str()));
        self.event_index = index_by_handle(self.events.iter().map(|r| r.handle.as_str()));
        self.note_index = index_by_handle(self.notes.iter().map(|r| r.handle.as_str()));
        self.media_index = index_by_handle(self.media.iter().map(|r| r.handle.as_str()));
    }

    #[must_use]
    pub fn place(&self, handle: &str) -> Option<&PlaceRecord> {
        self.place_index.get(handle).map(|&idx| &self.places[idx])
    }

    #[must_use]
    pub fn person(&self, handle: &str) -> Option<&PersonRecord> {
        self.person_index.get(handle).map(|&idx| &self.people[idx])
    }

    #[must_use]
    pub fn family(&self, handle: &str) -> Option<&FamilyRecord> {
        self.family_index.get(handle).map(|&idx| &self.families[idx])
    }

    #[must_use]
    pub fn event(&self, handle: &str) -> Option<&EventRecord> {
        self.event_index.get(handle).map(|&idx| &self.events[idx])
    }

    #[must_use]
    pub fn note(&self, handle: &str) -> Option<&NoteRecord> {
        self.note_index.get(handle).map(|&idx| &self.notes[idx])
    }

    #[must_use]
    pub fn media_object(&self, handle: &str) -> Option<&MediaRecord> {
        self.media_index.get(handle).map(|&idx| &self.media[idx])
    }

    /// Total number of records of every kind.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.places.len()
            + self.people.len()
            + self.families.len()
            + self.events.len()
            + self.notes.len()
            + self.media.len()
    }
}

/// Parse the document at `path` (plain or gzip-compressed).
///
/// # Errors
///
/// Returns `DocumentParse` if the file is not well-formed XML or has no
/// Gramps `database` root, or an I/O error if it cannot be read.
pub fn parse_file(path: &Path) -> Result<GrampsDocument> {
    let source = open_document(path)?;
    parse_reader(source, path, Utc::now())
}

/// Parse a document held in memory.
///
/// # Errors
///
/// Same as [`parse_file`].
pub fn parse_str(xml: &str) -> Result<GrampsDocument> {
    parse_reader(xml.as_bytes(), Path::new("<memory>"), Utc::now())
}

/// Parse from any buffered source. `now` stands in for missing change times.
///
/// # Errors
///
/// Same as [`parse_file`].
pub fn parse_reader<R: BufRead>(
    source: R,
    path: &Path,
    now: DateTime<Utc>,
) -> Result<GrampsDocument> {
    let mut reader = NsReader::from_reader(source);
    reader.config_mut().expand_empty_elements = true;

    let mut builder = Builder::new(now);
    let mut buf = Vec::with_capacity(8192);

    loop {
        let (ns, event) = match reader.read_resolved_event_into(&mut buf) {
            Ok(pair) => pair,
            Err(err) => {
                return Err(RootsyncError::parse(
                    path,
                    format!("{err} (at byte {})", reader.error_position()),
                ));
            }
        };
        let in_gramps_ns = is_gramps_namespace(&ns);

        match event {
            Event::Start(ref e) => builder
                .start(e, in_gramps_ns)
                .map_err(|err| RootsyncError::parse(path, err.to_string()))?,
            Event::End(ref e) => {
                let local = e.local_name();
                builder.end(local.as_ref(), in_gramps_ns);
            }
            Event::Text(ref e) => {
                if builder.capturing() {
                    let text = e
                        .unescape()
                        .map_err(|err| RootsyncError::parse(path, err.to_string()))?;
                    builder.text(&text);
                }
            }
            Event::CData(ref e) => {
                if builder.capturing() {
                    builder.text(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    if !builder.saw_root {
        return Err(RootsyncError::parse(
            path,
            "root element is not a Gramps <database>",
        ));
    }

    let doc = builder.finish();
    debug!(
        places = doc.places.len(),
        people = doc.people.len(),
        families = doc.families.len(),
        events = doc.events.len(),
        notes = doc.notes.len(),
        media = doc.media.len(),
        "Parsed Gramps document"
    );
    Ok(doc)
}

fn is_gramps_namespace(ns: &ResolveResult<'_>) -> bool {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => uri.starts_with(GRAMPS_NS_PREFIX.as_bytes()),
        ResolveResult::Unbound => true,
        ResolveResult::Unknown(_) => false,
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> std::result::Result<Option<String>, quick_xml::Error> {
    for attribute in e.attributes() {
        let attribute = attribute?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Text-bearing child element currently being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PlaceTitle,
    FirstName,
    Surname,
    Gender,
    EventType,
    Description,
    NoteText,
}

#[derive(Debug)]
enum Open {
    Place {
        record: PlaceRecord,
        pname: Option<String>,
    },
    Person {
        record: PersonRecord,
        seen_name: bool,
        in_primary_name: bool,
        events: Vec<String>,
        media: Vec<String>,
        notes: Vec<String>,
    },
    Family {
        record: FamilyRecord,
        events: Vec<String>,
        notes: Vec<String>,
    },
    Event {
        record: EventRecord,
        type_text: Option<String>,
        seen_date: bool,
        notes: Vec<String>,
    },
    Note(NoteRecord),
    Media(MediaRecord),
}

struct Identity {
    handle: String,
    gramps_id: Option<String>,
    last_changed: DateTime<Utc>,
}

struct Builder {
    doc: GrampsDocument,
    now: DateTime<Utc>,
    saw_root: bool,
    depth: usize,
    open: Option<Open>,
    record_depth: usize,
    capture: Option<(Field, usize)>,
    text: String,
}

impl Builder {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            doc: GrampsDocument::default(),
            now,
            saw_root: false,
            depth: 0,
            open: None,
            record_depth: 0,
            capture: None,
            text: String::new(),
        }
    }

    const fn capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn identity(&self, e: &BytesStart<'_>) -> std::result::Result<Identity, quick_xml::Error> {
        Ok(Identity {
            handle: attr(e, b"handle")?.unwrap_or_default(),
            gramps_id: non_empty(attr(e, b"id")?),
            last_changed: parse_change_time(attr(e, b"change")?.as_deref(), self.now),
        })
    }

    fn begin_capture(&mut self, field: Field) {
        self.capture = Some((field, self.depth));
        self.text.clear();
    }

    fn start(
        &mut self,
        e: &BytesStart<'_>,
        in_gramps_ns: bool,
    ) -> std::result::Result<(), quick_xml::Error> {
        self.depth += 1;
        if !in_gramps_ns || self.capture.is_some() {
            return Ok(());
        }
        let local = e.local_name();
        let name = local.as_ref();

        if self.depth == 1 && name == b"database" {
            self.saw_root = true;
            return Ok(());
        }

        let Some(open) = self.open.as_mut() else {
            self.open_record(e, name)?;
            return Ok(());
        };

        let child_depth = self.record_depth + 1;
        let mut capture = None;

        match open {
            Open::Place { record, pname } if self.depth == child_depth => match name {
                b"ptitle" => capture = Some(Field::PlaceTitle),
                b"pname" if pname.is_none() => *pname = non_empty(attr(e, b"value")?),
                b"coord" => {
                    record.latitude = attr(e, b"lat")?.as_deref().and_then(parse_coordinate);
                    record.longitude = attr(e, b"long")?.as_deref().and_then(parse_coordinate);
                }
                _ => {}
            },
            Open::Person {
                seen_name,
                in_primary_name,
                events,
                media,
                notes,
                ..
            } => {
                if self.depth == child_depth {
                    match name {
                        b"gender" => capture = Some(Field::Gender),
                        b"name" if !*seen_name => {
                            *seen_name = true;
                            *in_primary_name = true;
                        }
                        b"eventref" => events.extend(attr(e, b"hlink")?),
                        b"objref" => media.extend(attr(e, b"hlink")?),
                        b"noteref" => notes.extend(attr(e, b"hlink")?),
                        _ => {}
                    }
                } else if *in_primary_name && self.depth == child_depth + 1 {
                    match name {
                        b"first" => capture = Some(Field::FirstName),
                        b"surname" => capture = Some(Field::Surname),
                        _ => {}
                    }
                }
            }
            Open::Family {
                record,
                events,
                notes,
            } if self.depth == child_depth => match name {
                b"father" => record.father = non_empty(attr(e, b"hlink")?),
                b"mother" => record.mother = non_empty(attr(e, b"hlink")?),
                b"childref" => record.children.extend(non_empty(attr(e, b"hlink")?)),
                b"eventref" => events.extend(attr(e, b"hlink")?),
                b"noteref" => notes.extend(attr(e, b"hlink")?),
                _ => {}
            },
            Open::Event {
                record,
                seen_date,
                notes,
                ..
            } if self.depth == child_depth => match name {
                b"type" => capture = Some(Field::EventType),
                b"dateval" if !*seen_date => {
                    *seen_date = true;
                    record.date = attr(e, b"val")?.as_deref().and_then(parse_gramps_date);
                }
                b"place" => record.place = non_empty(attr(e, b"hlink")?),
                b"description" => capture = Some(Field::Description),
                b"noteref" => notes.extend(attr(e, b"hlink")?),
                _ => {}
            },
            Open::Note(_) if self.depth == child_depth && name == b"text" => {
                capture = Some(Field::NoteText);
            }
            Open::Media(record) if self.depth == child_depth && name == b"file" => {
                if record.file.is_none() {
                    record.file = Some(MediaFile {
                        src: attr(e, b"src")?.unwrap_or_default(),
                        mime: attr(e, b"mime")?.unwrap_or_default(),
                        description: attr(e, b"description")?.unwrap_or_default(),
                    });
                }
            }
            _ => {}
        }

        if let Some(field) = capture {
            self.begin_capture(field);
        }
        Ok(())
    }

    fn open_record(
        &mut self,
        e: &BytesStart<'_>,
        name: &[u8],
    ) -> std::result::Result<(), quick_xml::Error> {
        let open = match name {
            b"placeobj" => {
                let id = self.identity(e)?;
                Open::Place {
                    record: PlaceRecord {
                        handle: id.handle,
                        gramps_id: id.gramps_id,
                        name: String::new(),
                        latitude: None,
                        longitude: None,
                        last_changed: id.last_changed,
                    },
                    pname: None,
                }
            }
            b"person" => {
                let id = self.identity(e)?;
                Open::Person {
                    record: PersonRecord {
                        handle: id.handle,
                        gramps_id: id.gramps_id,
                        first_name: String::new(),
                        last_name: String::new(),
                        gender: Gender::Unknown,
                        last_changed: id.last_changed,
                    },
                    seen_name: false,
                    in_primary_name: false,
                    events: Vec::new(),
                    media: Vec::new(),
                    notes: Vec::new(),
                }
            }
            b"family" => {
                let id = self.identity(e)?;
                Open::Family {
                    record: FamilyRecord {
                        handle: id.handle,
                        gramps_id: id.gramps_id,
                        father: None,
                        mother: None,
                        children: Vec::new(),
                        last_changed: id.last_changed,
                    },
                    events: Vec::new(),
                    notes: Vec::new(),
                }
            }
            b"event" => {
                let id = self.identity(e)?;
                Open::Event {
                    record: EventRecord {
                        handle: id.handle,
                        gramps_id: id.gramps_id,
                        event_type: EventType::Unknown,
                        date: None,
                        place: None,
                        description: String::new(),
                        last_changed: id.last_changed,
                    },
                    type_text: None,
                    seen_date: false,
                    notes: Vec::new(),
                }
            }
            b"note" => {
                let id = self.identity(e)?;
                Open::Note(NoteRecord {
                    handle: id.handle,
                    gramps_id: id.gramps_id,
                    text: String::new(),
                    last_changed: id.last_changed,
                })
            }
            b"object" => {
                let id = self.identity(e)?;
                Open::Media(MediaRecord {
                    handle: id.handle,
                    gramps_id: id.gramps_id,
                    file: None,
                    last_changed: id.last_changed,
                })
            }
            _ => return Ok(()),
        };
        self.open = Some(open);
        self.record_depth = self.depth;
        Ok(())
    }

    fn end(&mut self, name: &[u8], in_gramps_ns: bool) {
        let depth = self.depth;
        self.depth = self.depth.saturating_sub(1);

        if let Some((field, capture_depth)) = self.capture {
            if depth != capture_depth {
                return;
            }
            self.capture = None;
            let value = std::mem::take(&mut self.text);
            self.store(field, value.trim());
            return;
        }

        if !in_gramps_ns {
            return;
        }

        if let Some(Open::Person {
            in_primary_name, ..
        }) = self.open.as_mut()
        {
            if depth == self.record_depth + 1 && name == b"name" {
                *in_primary_name = false;
            }
        }

        if self.open.is_some() && depth == self.record_depth {
            if let Some(open) = self.open.take() {
                self.close_record(open);
            }
        }
    }

    fn store(&mut self, field: Field, value: &str) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        match (field, open) {
            (Field::PlaceTitle, Open::Place { record, .. }) => record.name = value.to_string(),
            (Field::FirstName, Open::Person { record, .. }) => {
                if record.first_name.is_empty() {
                    record.first_name = value.to_string();
                }
            }
            (Field::Surname, Open::Person { record, .. }) => {
                if record.last_name.is_empty() {
                    record.last_name = value.to_string();
                }
            }
            (Field::Gender, Open::Person { record, .. }) => {
                record.gender = Gender::from_gramps(value);
            }
            (Field::EventType, Open::Event { type_text, .. }) => {
                if type_text.is_none() {
                    *type_text = Some(value.to_string());
                }
            }
            (Field::Description, Open::Event { record, .. }) => {
                record.description = value.to_string();
            }
            (Field::NoteText, Open::Note(record)) => record.text = value.to_string(),
            _ => {}
        }
    }

    fn close_record(&mut self, open: Open) {
        let refs = &mut self.doc.refs;
        match open {
            Open::Place { mut record, pname } => {
                if record.name.is_empty() {
                    record.name = pname.unwrap_or_default();
                }
                self.doc.places.push(record);
            }
            Open::Person {
                record,
                events,
                media,
                notes,
                ..
            } => {
                if !record.handle.is_empty() {
                    refs.person_events.insert(record.handle.clone(), events);
                    refs.person_media.insert(record.handle.clone(), media);
                    refs.person_notes.insert(record.handle.clone(), notes);
                }
                self.doc.people.push(record);
            }
            Open::Family {
                record,
                events,
                notes,
            } => {
                if !record.handle.is_empty() {
                    refs.family_events.insert(record.handle.clone(), events);
                    refs.family_notes.insert(record.handle.clone(), notes);
                }
                self.doc.families.push(record);
            }
            Open::Event {
                mut record,
                type_text,
                notes,
                ..
            } => {
                record.event_type = type_text
                    .as_deref()
                    .map_or(EventType::Unknown, EventType::from_gramps);
                if !record.handle.is_empty() {
                    refs.event_notes.insert(record.handle.clone(), notes);
                }
                self.doc.events.push(record);
            }
            Open::Note(record) => self.doc.notes.push(record),
            Open::Media(record) => self.doc.media.push(record),
        }
    }

    fn finish(mut self) -> GrampsDocument {
        self.doc.build_indexes();
        self.doc
    }
}
