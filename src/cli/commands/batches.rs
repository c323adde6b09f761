use crate::cli::BatchesArgs;
use crate::config;
use crate::error::Result;
use crate::model::{BatchStatus, ImportBatch};
use crate::util::format_timestamp;

/// Execute the batches command: newest batches first.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or queried.
pub fn execute(args: &BatchesArgs, json: bool, cli: &config::CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(None, cli)?;
    let batches = ctx.storage.list_import_batches(args.limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
        return Ok(());
    }

    if batches.is_empty() {
        println!("No imports recorded.");
        return Ok(());
    }
    for batch in &batches {
        println!("{}", format_batch_line(batch));
    }
    Ok(())
}

fn format_batch_line(batch: &ImportBatch) -> String {
    let mut line = format!(
        "#{:<4} {:<9} {}  {}",
        batch.id,
        batch.status.as_str(),
        format_timestamp(&batch.imported_at),
        batch.name
    );
    if batch.status == BatchStatus::Failed {
        if let Some(error) = &batch.error {
            line.push_str(&format!("\n       {error}"));
        }
    }
    line
}
