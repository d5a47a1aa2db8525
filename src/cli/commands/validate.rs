use crate::cli::SourceArgs;
use crate::cli::commands::{Workspace, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::report::ValidationReport;
use crate::validation::ConflictValidator;

/// Execute the validate command. Never writes to the store.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened or output fails.
pub fn execute(args: &SourceArgs, json: bool, cli: &CliOverrides) -> Result<ValidationReport> {
    let workspace = Workspace::open(cli, None)?;
    let adapter = args.kind.adapter();
    let report = ConflictValidator::validate_source(
        adapter.as_ref(),
        &args.source,
        workspace.store.as_ref(),
        &workspace.config.known_worlds,
    );

    if json {
        print_json(&report)?;
    } else {
        print!("{report}");
    }
    Ok(report)
}
