//! CLI definitions and entry point.

use crate::source::SourceKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Reconciling importer for territorial faction data
#[derive(Parser, Debug)]
#[command(name = "fmig", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (defaults to .factions/factions.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Actor recorded on backups, faction logs and created zones
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Append JSON logs to this file
    #[arg(long, global = true, env = "FMIG_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a .factions workspace with an empty store
    Init {
        /// Replace an existing store
        #[arg(long)]
        force: bool,
    },

    /// Check a source directory against the store without changing anything
    Validate(SourceArgs),

    /// Import a source directory into the store
    Migrate(MigrateArgs),

    /// List factions in the store
    List(ListArgs),

    /// List pre-migration backups
    History(HistoryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source tool's data directory
    pub source: PathBuf,

    /// Source format
    #[arg(long = "from", value_parser = parse_kind)]
    pub kind: SourceKind,
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Simulate the run and report what would change
    #[arg(long)]
    pub dry_run: bool,

    /// Replace factions that already exist in the store
    #[arg(long)]
    pub overwrite: bool,

    /// Do not create zones
    #[arg(long)]
    pub skip_zones: bool,

    /// Do not redistribute legacy power
    #[arg(long)]
    pub skip_power: bool,

    /// Do not snapshot the store first
    #[arg(long)]
    pub no_backup: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only factions whose name contains this text (case-insensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Maximum number of factions to show (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone, Default)]
pub struct HistoryArgs {
    /// Maximum number of backups to show (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
}

fn parse_kind(value: &str) -> Result<SourceKind, String> {
    value.parse::<SourceKind>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate_flags() {
        let cli = Cli::try_parse_from([
            "fmig", "migrate", "./data", "--from", "jsonl", "--dry-run", "--overwrite",
            "--no-backup", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.source.kind, SourceKind::Jsonl);
        assert!(args.dry_run && args.overwrite && args.no_backup);
        assert!(!args.skip_zones);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Cli::try_parse_from(["fmig", "validate", "./data", "--from", "yaml"]);
        assert!(err.is_err());
    }
}
