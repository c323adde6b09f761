use clap::Parser;
use rootsync::cli::commands;
use rootsync::cli::{Cli, Commands};
use rootsync::config;
use rootsync::logging::init_logging;
use rootsync::{RootsyncError, StructuredError};
use std::io::{self, IsTerminal};
use tracing::debug;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, None) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let overrides = build_cli_overrides(&cli);

    let result = match &cli.command {
        Commands::Init { force } => commands::init::execute(*force, cli.json, None, &overrides),
        Commands::Import(args) => commands::import::execute(args, cli.json, cli.quiet, &overrides),
        Commands::Batches(args) => commands::batches::execute(args, cli.json, &overrides),
        Commands::Stats => commands::stats::execute(cli.json, &overrides),
        Commands::Person { gramps_id } => commands::person::execute(gramps_id, cli.json, &overrides),
        Commands::Edit(args) => commands::edit::execute(args, cli.json, &overrides),
        Commands::Modified => commands::modified::execute(cli.json, &overrides),
        Commands::Completions(args) => commands::completions::execute(args),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json, &overrides);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs human-readable error with optional color.
fn handle_error(err: &RootsyncError, json_mode: bool, overrides: &config::CliOverrides) -> ! {
    debug!(error = %err, recoverable = err.is_user_recoverable(), "Command failed");
    let structured = match err {
        RootsyncError::PersonNotFound { gramps_id } => known_person_ids(overrides).map_or_else(
            || StructuredError::from_error(err),
            |ids| StructuredError::person_not_found(gramps_id, &ids),
        ),
        _ => StructuredError::from_error(err),
    };
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

/// Ids for "did you mean" hints; `None` if the workspace cannot be read.
fn known_person_ids(overrides: &config::CliOverrides) -> Option<Vec<String>> {
    let ctx = config::open_storage_with_cli(None, overrides).ok()?;
    ctx.storage.get_all_person_gramps_ids().ok()
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        db: cli.db.clone(),
        media_root: cli.media_root.clone(),
        gramps_media: None,
        lock_timeout: cli.lock_timeout,
    }
}
