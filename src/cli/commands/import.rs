//! Import command: record a batch, run the pipeline, record the outcome.

use crate::cli::ImportArgs;
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::import::{ImportOptions, ImportSummary, run_import};
use crate::model::BatchStatus;
use crate::storage::SqliteStorage;
use crate::util::progress::should_show_progress;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Execute the import command.
///
/// # Errors
///
/// Returns the pipeline's error after marking the batch failed, or an error
/// if the workspace cannot be opened.
pub fn execute(args: &ImportArgs, json: bool, quiet: bool, cli: &CliOverrides) -> Result<()> {
    let mut cli = cli.clone();
    if args.gramps_media.is_some() {
        cli.gramps_media.clone_from(&args.gramps_media);
    }
    let ctx = config::open_storage_with_cli(None, &cli)?;
    let mut storage = ctx.storage;

    let options = ImportOptions {
        media_root: ctx.settings.media_root.clone(),
        media_subfolder: ctx.settings.media_subfolder.clone(),
        gramps_media_base: ctx.settings.gramps_media_base.clone(),
        loose_media_dir: args.loose_media.as_deref().map(absolute),
        show_progress: !json && !quiet && should_show_progress(),
    };

    let (batch_id, summary) = import_file(&mut storage, &args.file, args.name.as_deref(), &options)?;

    if json {
        let output = json!({ "batch_id": batch_id, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !quiet {
        print_summary(batch_id, &summary);
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Persist an import batch for `file`, run the pipeline and record the outcome.
///
/// Returns the batch id and the run summary.
///
/// # Errors
///
/// Returns the pipeline error (the batch is marked failed first), or a
/// database error creating the batch.
pub fn import_file(
    storage: &mut SqliteStorage,
    file: &Path,
    name: Option<&str>,
    options: &ImportOptions,
) -> Result<(i64, ImportSummary)> {
    let file = absolute(file);
    let name = name.map_or_else(
        || {
            file.file_name()
                .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned())
        },
        str::to_string,
    );
    let batch = storage.create_import_batch(&name, &file.to_string_lossy())?;
    info!(batch = batch.id, name = %name, "Created import batch");

    match run_import(storage, &file, options) {
        Ok(summary) => {
            let summary_json = serde_json::to_string(&summary)?;
            storage.finish_import_batch(
                batch.id,
                BatchStatus::Completed,
                Some(&summary_json),
                None,
            )?;
            Ok((batch.id, summary))
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(record_err) =
                storage.finish_import_batch(batch.id, BatchStatus::Failed, None, Some(&message))
            {
                warn!(batch = batch.id, error = %record_err, "Could not record failed import");
            }
            Err(err)
        }
    }
}

fn print_summary(batch_id: i64, summary: &ImportSummary) {
    let counts = summary
        .imported_counts()
        .iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Imported {counts} (batch #{batch_id})");

    let kinds = [
        ("people", &summary.people),
        ("families", &summary.families),
        ("events", &summary.events),
        ("places", &summary.places),
        ("notes", &summary.notes),
        ("media", &summary.media),
    ];
    for (kind, c) in kinds {
        if c.parsed == 0 {
            continue;
        }
        println!(
            "  {kind:<9} {} created, {} updated, {} unchanged, {} skipped",
            c.created, c.updated, c.unchanged, c.skipped
        );
    }

    let files = &summary.files;
    if files.copied + files.reused + files.already_managed + files.unresolved > 0 {
        println!(
            "  files     {} copied, {} reused, {} already managed, {} unresolved",
            files.copied, files.reused, files.already_managed, files.unresolved
        );
    }
    if summary.loose_associated > 0 {
        println!("  loose     {} images associated", summary.loose_associated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RootsyncError;
    use crate::import::GRAMPS_NS;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_import_file_records_completed_batch() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("export.gramps");
        fs::write(
            &input,
            format!(r#"<database xmlns="{GRAMPS_NS}"><people><person handle="_a" id="I1"/></people></database>"#),
        )
        .unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let options = ImportOptions::new(temp.path().join("media"));

        let (batch_id, summary) = import_file(&mut storage, &input, None, &options).unwrap();
        assert_eq!(summary.people.created, 1);

        let batch = storage.get_import_batch(batch_id).unwrap().unwrap();
        assert_eq!(batch.name, "export.gramps");
        assert_eq!(batch.status, BatchStatus::Completed);
        let recorded: ImportSummary =
            serde_json::from_str(batch.summary_json.as_deref().unwrap()).unwrap();
        assert_eq!(recorded, summary);
    }

    #[test]
    fn test_import_file_records_failed_batch() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("broken.gramps");
        fs::write(&input, "<database><people><person></people></database>").unwrap();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let options = ImportOptions::new(temp.path().join("media"));

        let err = import_file(&mut storage, &input, Some("bad"), &options).unwrap_err();
        assert!(matches!(err, RootsyncError::DocumentParse { .. }));

        let batch = &storage.list_import_batches(1).unwrap()[0];
        assert_eq!(batch.name, "bad");
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch.summary_json.is_none());
        assert!(batch.error.as_deref().unwrap().contains("broken.gramps"));
    }
}
