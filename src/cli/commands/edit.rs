use crate::cli::EditArgs;
use crate::config;
use crate::error::{Result, RootsyncError};
use crate::model::{Gender, Person};
use crate::storage::{PersonEdit, SqliteStorage};
use tracing::info;

/// Execute the edit command.
///
/// # Errors
///
/// Returns a validation error for an empty edit or bad gender, or
/// `PersonNotFound` for an unknown id.
pub fn execute(args: &EditArgs, json: bool, cli: &config::CliOverrides) -> Result<()> {
    let edit = build_edit(args)?;
    let mut ctx = config::open_storage_with_cli(None, cli)?;
    let person = apply(&mut ctx.storage, &args.gramps_id, &edit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&person)?);
    } else {
        println!("Updated {} {}", person.gramps_id, person.full_name());
    }
    Ok(())
}

/// Turn command arguments into a storage edit.
///
/// # Errors
///
/// Returns a validation error when no field is given or the gender is not
/// one of M, F or U.
pub fn build_edit(args: &EditArgs) -> Result<PersonEdit> {
    let gender = args
        .gender
        .as_deref()
        .map(str::parse::<Gender>)
        .transpose()?;
    let edit = PersonEdit {
        first_name: args.first.clone(),
        last_name: args.last.clone(),
        gender,
        is_deceased: args.deceased,
    };
    if edit.is_empty() {
        return Err(RootsyncError::validation(
            "edit",
            "nothing to change; pass --first, --last, --gender or --deceased",
        ));
    }
    Ok(edit)
}

/// Apply `edit` to the person with `gramps_id`.
///
/// # Errors
///
/// Returns `PersonNotFound` for an unknown id, or a database error.
pub fn apply(storage: &mut SqliteStorage, gramps_id: &str, edit: &PersonEdit) -> Result<Person> {
    let person = storage.update_person_details(gramps_id, edit)?;
    info!(gramps_id, "Applied local edit");
    Ok(person)
}
