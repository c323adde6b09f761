//! Gramps document and package builders for tests.

use flate2::Compression;
use flate2::write::GzEncoder;
use rootsync::import::GRAMPS_NS;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Fixed change time (2023-11-14) so runs compare equal.
pub const CHANGED: i64 = 1_700_000_000;

/// Minimal JPEG-looking bytes; content only matters for identity checks.
pub fn image_bytes(tag: &str) -> Vec<u8> {
    let mut bytes = vec![0xff, 0xd8, 0xff, 0xe0];
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

/// Builds a Gramps XML document section by section.
#[derive(Debug, Default, Clone)]
pub struct TreeBuilder {
    events: Vec<String>,
    people: Vec<String>,
    families: Vec<String>,
    objects: Vec<String>,
    places: Vec<String>,
    notes: Vec<String>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Person with a primary name and any extra child elements.
    pub fn person(
        mut self,
        handle: &str,
        id: &str,
        first: &str,
        last: &str,
        gender: &str,
        extra: &str,
    ) -> Self {
        self.people.push(format!(
            r#"<person handle="{handle}" change="{CHANGED}" id="{id}">
                 <gender>{gender}</gender>
                 <name type="Birth Name"><first>{first}</first><surname>{last}</surname></name>
                 {extra}
               </person>"#
        ));
        self
    }

    pub fn person_xml(mut self, xml: &str) -> Self {
        self.people.push(xml.to_string());
        self
    }

    pub fn family(
        mut self,
        handle: &str,
        id: &str,
        father: Option<&str>,
        mother: Option<&str>,
        children: &[&str],
    ) -> Self {
        let mut body = String::new();
        if let Some(father) = father {
            body.push_str(&format!(r#"<father hlink="{father}"/>"#));
        }
        if let Some(mother) = mother {
            body.push_str(&format!(r#"<mother hlink="{mother}"/>"#));
        }
        for child in children {
            body.push_str(&format!(r#"<childref hlink="{child}"/>"#));
        }
        self.families.push(format!(
            r#"<family handle="{handle}" change="{CHANGED}" id="{id}">{body}</family>"#
        ));
        self
    }

    pub fn event(
        mut self,
        handle: &str,
        id: &str,
        kind: &str,
        date: Option<&str>,
        place: Option<&str>,
    ) -> Self {
        let date = date.map_or_else(String::new, |d| format!(r#"<dateval val="{d}"/>"#));
        let place = place.map_or_else(String::new, |p| format!(r#"<place hlink="{p}"/>"#));
        self.events.push(format!(
            r#"<event handle="{handle}" change="{CHANGED}" id="{id}">
                 <type>{kind}</type>{date}{place}
               </event>"#
        ));
        self
    }

    pub fn place(mut self, handle: &str, id: &str, title: &str) -> Self {
        self.places.push(format!(
            r#"<placeobj handle="{handle}" change="{CHANGED}" id="{id}" type="City">
                 <ptitle>{title}</ptitle><pname value="{title}"/>
               </placeobj>"#
        ));
        self
    }

    pub fn note(mut self, handle: &str, id: &str, text: &str) -> Self {
        self.notes.push(format!(
            r#"<note handle="{handle}" change="{CHANGED}" id="{id}" type="General">
                 <text>{text}</text>
               </note>"#
        ));
        self
    }

    pub fn object(mut self, handle: &str, id: &str, src: &str) -> Self {
        self.objects.push(format!(
            r#"<object handle="{handle}" change="{CHANGED}" id="{id}">
                 <file src="{src}" mime="image/jpeg" description="{id}"/>
               </object>"#
        ));
        self
    }

    pub fn build(&self) -> String {
        let section = |tag: &str, items: &[String]| {
            if items.is_empty() {
                String::new()
            } else {
                format!("<{tag}>\n{}\n</{tag}>\n", items.join("\n"))
            }
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE database PUBLIC "-//Gramps//DTD Gramps XML 1.7.2//EN"
"http://gramps-project.org/xml/1.7.2/grampsxml.dtd">
<database xmlns="{GRAMPS_NS}">
  <header><created date="2024-01-01" version="5.2.0"/></header>
{}{}{}{}{}{}</database>
"#,
            section("events", &self.events),
            section("people", &self.people),
            section("families", &self.families),
            section("objects", &self.objects),
            section("places", &self.places),
            section("notes", &self.notes),
        )
    }
}

/// Write `xml` gzip-compressed, the way Gramps saves `.gramps` files.
pub fn write_gzip_document(path: &Path, xml: &str) {
    let file = File::create(path).expect("create document");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(xml.as_bytes()).expect("write document");
    encoder.finish().expect("finish gzip");
}

/// Write a Gramps XML package: a gzip-compressed tar holding the members.
pub fn write_package(path: &Path, members: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create package");
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, bytes) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *bytes)
            .expect("append member");
    }
    let encoder = builder.into_inner().expect("finish tar");
    encoder.finish().expect("finish gzip");
}
