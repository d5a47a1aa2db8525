use clap::Parser;
use faction_migrate::cli::commands;
use faction_migrate::cli::{Cli, Commands};
use faction_migrate::config;
use faction_migrate::logging::init_logging;
use faction_migrate::report::RunOutcome;
use faction_migrate::{ErrorCode, MigrationError, StructuredError};
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let overrides = config::CliOverrides {
        db: cli.db.clone(),
        actor: cli.actor.clone(),
    };

    let result = match &cli.command {
        Commands::Init { force } => commands::init::execute(*force, None).map(|()| 0),
        Commands::Validate(args) => commands::validate::execute(args, cli.json, &overrides)
            .map(|report| {
                if report.valid {
                    0
                } else {
                    ErrorCode::ValidationFailed.exit_code()
                }
            }),
        Commands::Migrate(args) => commands::migrate::execute(args, cli.json, &overrides)
            .map(|report| match report.outcome {
                RunOutcome::Completed => 0,
                RunOutcome::Rejected => ErrorCode::MigrationInProgress.exit_code(),
                RunOutcome::Failed => ErrorCode::SourceMissing.exit_code(),
            }),
        Commands::List(args) => commands::list::execute(args, cli.json, &overrides).map(|()| 0),
        Commands::History(args) => {
            commands::history::execute(args, cli.json, &overrides).map(|()| 0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => handle_error(&e, cli.json),
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs a human-readable error with optional color.
fn handle_error(err: &MigrationError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    if json_mode || !io::stdout().is_terminal() {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        eprintln!("{}", structured.to_human(io::stderr().is_terminal()));
    }

    std::process::exit(exit_code);
}
