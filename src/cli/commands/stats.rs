//! Stats command implementation.
//!
//! Shows row counts per entity kind and when the last import finished.

use crate::config;
use crate::error::Result;
use crate::import::LAST_IMPORT_KEY;
use crate::storage::{EntityCounts, SqliteStorage};
use serde::Serialize;
use tracing::info;

/// Database statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub counts: EntityCounts,
    pub last_import_time: Option<String>,
}

/// Execute the stats command.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or queries fail.
pub fn execute(json: bool, cli: &config::CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(None, cli)?;
    info!("Computing database statistics");
    let stats = compute(&ctx.storage)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_text(&stats);
    }
    Ok(())
}

/// Gather statistics from `storage`.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn compute(storage: &SqliteStorage) -> Result<Statistics> {
    Ok(Statistics {
        counts: storage.entity_counts()?,
        last_import_time: storage.get_metadata(LAST_IMPORT_KEY)?,
    })
}

fn print_text(stats: &Statistics) {
    let c = &stats.counts;
    println!("Database Statistics:");
    println!();
    println!("  People:         {}", c.persons);
    println!("  Families:       {}", c.families);
    println!("  Child links:    {}", c.family_children);
    println!("  Events:         {}", c.events);
    println!("  Places:         {}", c.places);
    println!("  Notes:          {}", c.notes);
    println!("  Media:          {}", c.media);
    println!("  Import batches: {}", c.import_batches);
    println!();
    match &stats.last_import_time {
        Some(ts) => println!("Last import: {ts}"),
        None => println!("Last import: never"),
    }
}
