//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// Gramps XML import and reconciliation for a family-tree database
#[derive(Parser, Debug)]
#[command(name = "rootsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: .rootsync/rootsync.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Managed media root (default: <workspace>/media)
    #[arg(long, global = true)]
    pub media_root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a rootsync workspace
    Init {
        /// Reinitialize an existing workspace
        #[arg(long)]
        force: bool,
    },

    /// Import a Gramps XML document or package
    Import(ImportArgs),

    /// List recorded import batches
    Batches(BatchesArgs),

    /// Show row counts and the last import time
    Stats,

    /// Show one person with family, event and media details
    Person {
        /// Gramps id (e.g. I0001)
        gramps_id: String,
    },

    /// Edit local person fields (marks the person as locally modified)
    Edit(EditArgs),

    /// List persons with local modifications since their last import
    Modified,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ImportArgs {
    /// Gramps file: `.gramps` (plain or gzip) or `.gpkg` package
    pub file: PathBuf,

    /// Batch name (default: the file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Directory the Gramps media paths are relative to
    #[arg(long)]
    pub gramps_media: Option<PathBuf>,

    /// Scan this directory for loose images named after people
    #[arg(long)]
    pub loose_media: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchesArgs {
    /// Maximum number of batches to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Gramps id of the person to edit
    pub gramps_id: String,

    /// New first name
    #[arg(long)]
    pub first: Option<String>,

    /// New last name
    #[arg(long)]
    pub last: Option<String>,

    /// New gender (M, F or U)
    #[arg(long)]
    pub gender: Option<String>,

    /// Mark as deceased (true/false)
    #[arg(long)]
    pub deceased: Option<bool>,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: ShellType,

    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Supported shells for completion generation.
#[derive(ValueEnum, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    #[value(name = "powershell")]
    #[value(alias = "pwsh")]
    /// `PowerShell`
    PowerShell,
    /// Elvish
    Elvish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import_with_global_flags() {
        let cli = Cli::try_parse_from([
            "rootsync",
            "import",
            "tree.gpkg",
            "--name",
            "March export",
            "--loose-media",
            "scans",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert_eq!(args.file, PathBuf::from("tree.gpkg"));
        assert_eq!(args.name.as_deref(), Some("March export"));
        assert_eq!(args.loose_media, Some(PathBuf::from("scans")));
    }

    #[test]
    fn test_parse_edit() {
        let cli = Cli::try_parse_from([
            "rootsync", "edit", "I0001", "--last", "King", "--deceased", "true",
        ])
        .unwrap();
        let Commands::Edit(args) = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(args.gramps_id, "I0001");
        assert_eq!(args.last.as_deref(), Some("King"));
        assert_eq!(args.deceased, Some(true));
        assert_eq!(args.first, None);
    }

    #[test]
    fn test_batches_default_limit() {
        let cli = Cli::try_parse_from(["rootsync", "batches"]).unwrap();
        let Commands::Batches(args) = cli.command else {
            panic!("expected batches");
        };
        assert_eq!(args.limit, 20);
    }

    #[test]
    fn test_import_requires_file() {
        assert!(Cli::try_parse_from(["rootsync", "import"]).is_err());
    }
}
