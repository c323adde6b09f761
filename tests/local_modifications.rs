//! Local edits versus re-import: the modification flag must only clear when
//! the source itself moves past the edit.

mod common;

use chrono::Utc;
use common::fixtures::{CHANGED, TreeBuilder};
use common::{ImportBed, test_log};
use rootsync::model::Gender;
use rootsync::storage::PersonEdit;

fn tree(change: i64, first: &str) -> String {
    TreeBuilder::new()
        .person_xml(&format!(
            r#"<person handle="_p1" change="{change}" id="I1">
                 <gender>F</gender>
                 <name><first>{first}</first><surname>Lovelace</surname></name>
               </person>"#
        ))
        .person("_p2", "I2", "Charles", "Babbage", "M", "")
        .build()
}

fn modified_ids(bed: &ImportBed) -> Vec<String> {
    bed.storage
        .list_locally_modified_persons()
        .unwrap()
        .into_iter()
        .map(|p| p.gramps_id)
        .collect()
}

#[test]
fn fresh_import_has_no_local_modifications() {
    let _log = test_log("fresh_import_has_no_local_modifications");
    let mut bed = ImportBed::new();
    let input = bed.write_document("tree.gramps", &tree(CHANGED, "Ada"));
    bed.import(&input);

    assert!(modified_ids(&bed).is_empty());
    let ada = bed.storage.find_person_by_gramps_id("I1").unwrap().unwrap();
    assert_eq!(ada.gramps_last_updated.map(|t| t.timestamp()), Some(CHANGED));
    assert_eq!(ada.gender, Gender::Female);
}

#[test]
fn edit_survives_reimport_of_older_source() {
    let _log = test_log("edit_survives_reimport_of_older_source");
    let mut bed = ImportBed::new();
    let input = bed.write_document("tree.gramps", &tree(CHANGED, "Ada"));
    bed.import(&input);

    let edit = PersonEdit {
        is_deceased: Some(true),
        ..PersonEdit::default()
    };
    bed.storage.update_person_details("I1", &edit).unwrap();
    assert_eq!(modified_ids(&bed), ["I1"]);

    let summary = bed.import(&input);
    assert_eq!(summary.people.unchanged, 2);
    assert_eq!(modified_ids(&bed), ["I1"], "re-import keeps the local edit visible");
    let ada = bed.storage.find_person_by_gramps_id("I1").unwrap().unwrap();
    assert!(ada.is_deceased);
}

#[test]
fn newer_source_change_becomes_the_baseline() {
    let _log = test_log("newer_source_change_becomes_the_baseline");
    let mut bed = ImportBed::new();
    let input = bed.write_document("tree.gramps", &tree(CHANGED, "Ada"));
    bed.import(&input);

    let edit = PersonEdit {
        first_name: Some("Augusta".to_string()),
        ..PersonEdit::default()
    };
    bed.storage.update_person_details("I1", &edit).unwrap();
    assert_eq!(modified_ids(&bed), ["I1"]);

    let later = Utc::now().timestamp() + 3600;
    let input = bed.write_document("tree.gramps", &tree(later, "Ada"));
    let summary = bed.import(&input);

    assert_eq!(summary.people.updated, 1);
    assert!(modified_ids(&bed).is_empty());
    let ada = bed.storage.find_person_by_gramps_id("I1").unwrap().unwrap();
    assert_eq!(ada.first_name, "Ada", "source owns the name field");
    assert_eq!(ada.gramps_last_updated.map(|t| t.timestamp()), Some(later));
}

#[test]
fn linking_does_not_touch_person_rows() {
    let _log = test_log("linking_does_not_touch_person_rows");
    let mut bed = ImportBed::new();
    let xml = TreeBuilder::new()
        .event("_e1", "E1", "Birth", Some("1815-12-10"), None)
        .person("_p1", "I1", "Ada", "Lovelace", "F", r#"<eventref hlink="_e1"/>"#)
        .family("_f1", "F1", None, Some("_p1"), &[])
        .build();
    let input = bed.write_document("tree.gramps", &xml);
    bed.import(&input);
    let before = bed.storage.find_person_by_gramps_id("I1").unwrap().unwrap();

    bed.import(&input);
    let after = bed.storage.find_person_by_gramps_id("I1").unwrap().unwrap();
    assert_eq!(before.updated_at, after.updated_at);
    assert!(!after.has_local_modifications());
}
