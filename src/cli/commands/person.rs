//! Person command: one person with families, events and media.

use crate::config;
use crate::error::{Result, RootsyncError};
use crate::model::{Event, Family, MediaAsset, Person};
use crate::storage::SqliteStorage;
use crate::util::format_date;
use serde::Serialize;

/// A person together with everything linked to them.
#[derive(Debug, Clone, Serialize)]
pub struct PersonDetails {
    pub person: Person,
    pub has_local_modifications: bool,
    /// Families where this person is a parent, children in display order.
    pub families: Vec<FamilyView>,
    /// Families where this person is a child.
    pub parents: Vec<FamilyView>,
    pub events: Vec<Event>,
    pub media: Vec<MediaAsset>,
}

/// A family with its members' Gramps ids resolved.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyView {
    pub gramps_id: String,
    pub father: Option<PersonRef>,
    pub mother: Option<PersonRef>,
    pub children: Vec<PersonRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRef {
    pub gramps_id: String,
    pub name: String,
}

impl From<&Person> for PersonRef {
    fn from(person: &Person) -> Self {
        Self {
            gramps_id: person.gramps_id.clone(),
            name: person.full_name(),
        }
    }
}

/// Execute the person command.
///
/// # Errors
///
/// Returns `PersonNotFound` for an unknown id, or a storage error.
pub fn execute(gramps_id: &str, json: bool, cli: &config::CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(None, cli)?;
    let details = load(&ctx.storage, gramps_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
    } else {
        print_text(&details);
    }
    Ok(())
}

/// Load a person's details by Gramps id.
///
/// # Errors
///
/// Returns `PersonNotFound` for an unknown id, or a storage error.
pub fn load(storage: &SqliteStorage, gramps_id: &str) -> Result<PersonDetails> {
    let person = storage
        .find_person_by_gramps_id(gramps_id)?
        .ok_or_else(|| RootsyncError::PersonNotFound {
            gramps_id: gramps_id.to_string(),
        })?;

    let families = storage
        .get_families_as_parent(person.id)?
        .iter()
        .map(|family| family_view(storage, family))
        .collect::<Result<Vec<_>>>()?;
    let parents = storage
        .get_families_as_child(person.id)?
        .iter()
        .map(|family| family_view(storage, family))
        .collect::<Result<Vec<_>>>()?;

    Ok(PersonDetails {
        has_local_modifications: person.has_local_modifications(),
        families,
        parents,
        events: storage.get_person_events(person.id)?,
        media: storage.get_person_media(person.id)?,
        person,
    })
}

fn family_view(storage: &SqliteStorage, family: &Family) -> Result<FamilyView> {
    let lookup = |id: Option<i64>| -> Result<Option<PersonRef>> {
        match id {
            Some(id) => Ok(storage.get_person(id)?.as_ref().map(PersonRef::from)),
            None => Ok(None),
        }
    };

    let mut children = Vec::new();
    for link in storage.get_family_children(family.id)? {
        if let Some(child) = storage.get_person(link.child_id)? {
            children.push(PersonRef::from(&child));
        }
    }

    Ok(FamilyView {
        gramps_id: family.gramps_id.clone(),
        father: lookup(family.father_id)?,
        mother: lookup(family.mother_id)?,
        children,
    })
}

fn describe(person: Option<&PersonRef>) -> String {
    person.map_or_else(|| "?".to_string(), |p| format!("{} ({})", p.name, p.gramps_id))
}

fn print_text(details: &PersonDetails) {
    let p = &details.person;
    println!("{} {}", p.gramps_id, p.full_name());
    println!("  Gender:   {}", p.gender);
    if let Some(birth) = &p.birth_date {
        println!("  Born:     {}", format_date(birth));
    }
    if let Some(death) = &p.death_date {
        println!("  Died:     {}", format_date(death));
    } else if !p.is_alive() {
        println!("  Died:     (date unknown)");
    }
    if details.has_local_modifications {
        println!("  Locally modified since last import");
    }

    for family in &details.parents {
        println!(
            "  Parents:  {} + {} [{}]",
            describe(family.father.as_ref()),
            describe(family.mother.as_ref()),
            family.gramps_id
        );
    }
    for family in &details.families {
        println!(
            "  Family {}: {} + {}",
            family.gramps_id,
            describe(family.father.as_ref()),
            describe(family.mother.as_ref())
        );
        for (position, child) in family.children.iter().enumerate() {
            println!("    {}. {}", position + 1, describe(Some(child)));
        }
    }

    if !details.events.is_empty() {
        println!("  Events:");
        for event in &details.events {
            let date = event.date.as_ref().map_or_else(String::new, format_date);
            println!("    {:<9} {date} {}", event.event_type.as_str(), event.description);
        }
    }
    if !details.media.is_empty() {
        println!("  Media:");
        for media in &details.media {
            println!("    {}", media.file_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{ImportOptions, run_import};
    use crate::model::EventType;
    use std::fs;
    use tempfile::TempDir;

    const TREE: &str = r#"<database>
      <events>
        <event handle="_e1" id="E1"><type>Birth</type><dateval val="1900-02-03"/></event>
      </events>
      <people>
        <person handle="_f" id="I1"><gender>M</gender>
          <name><first>John</first><surname>Smith</surname></name>
          <eventref hlink="_e1"/>
        </person>
        <person handle="_m" id="I2"><gender>F</gender>
          <name><first>Mary</first><surname>Jones</surname></name>
        </person>
        <person handle="_c1" id="I3"><name><first>Ann</first><surname>Smith</surname></name></person>
        <person handle="_c2" id="I4"><name><first>Bob</first><surname>Smith</surname></name></person>
      </people>
      <families>
        <family handle="_fam" id="F1">
          <father hlink="_f"/><mother hlink="_m"/>
          <childref hlink="_c2"/><childref hlink="_c1"/>
        </family>
      </families>
    </database>"#;

    fn imported() -> (TempDir, SqliteStorage) {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("tree.gramps");
        fs::write(&input, TREE).unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        run_import(&mut storage, &input, &ImportOptions::new(temp.path().join("media"))).unwrap();
        (temp, storage)
    }

    #[test]
    fn test_load_parent_with_family_and_events() {
        let (_temp, storage) = imported();
        let details = load(&storage, "I1").unwrap();

        assert_eq!(details.person.full_name(), "John Smith");
        assert!(!details.has_local_modifications);
        assert_eq!(details.families.len(), 1);
        let family = &details.families[0];
        assert_eq!(family.mother.as_ref().unwrap().gramps_id, "I2");
        let children: Vec<_> = family.children.iter().map(|c| c.gramps_id.as_str()).collect();
        assert_eq!(children, vec!["I4", "I3"]);
        assert_eq!(details.events.len(), 1);
        assert_eq!(details.events[0].event_type, EventType::Birth);
        assert!(details.parents.is_empty());
    }

    #[test]
    fn test_load_child_lists_parents() {
        let (_temp, storage) = imported();
        let details = load(&storage, "I3").unwrap();
        assert_eq!(details.parents.len(), 1);
        assert_eq!(
            details.parents[0].father,
            Some(PersonRef {
                gramps_id: "I1".to_string(),
                name: "John Smith".to_string()
            })
        );
        assert!(details.families.is_empty());
    }

    #[test]
    fn test_unknown_person_is_an_error() {
        let (_temp, storage) = imported();
        let err = load(&storage, "I99").unwrap_err();
        assert!(matches!(err, RootsyncError::PersonNotFound { gramps_id } if gramps_id == "I99"));
    }
}
