use crate::config;
use crate::error::Result;
use crate::util::format_timestamp;
use serde_json::json;

/// Execute the modified command: persons edited locally since their last import.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or queried.
pub fn execute(json: bool, cli: &config::CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(None, cli)?;
    let persons = ctx.storage.list_locally_modified_persons()?;

    if json {
        let rows: Vec<_> = persons
            .iter()
            .map(|p| {
                json!({
                    "gramps_id": p.gramps_id,
                    "name": p.full_name(),
                    "updated_at": p.updated_at,
                    "gramps_last_updated": p.gramps_last_updated,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if persons.is_empty() {
        println!("No local modifications.");
        return Ok(());
    }
    println!("{} locally modified:", persons.len());
    for p in &persons {
        let synced = p
            .gramps_last_updated
            .as_ref()
            .map_or_else(|| "never".to_string(), format_timestamp);
        println!(
            "  {:<8} {}  (edited {}, imported {synced})",
            p.gramps_id,
            p.full_name(),
            format_timestamp(&p.updated_at)
        );
    }
    Ok(())
}
