use crate::cli::MigrateArgs;
use crate::cli::commands::{Workspace, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::migrate::{Collaborators, ImportOptions, MigrationLocks, MigrationPipeline};
use crate::report::ImportReport;
use crate::storage::HistoryBackupService;
use crate::util::progress::{create_spinner, should_show_progress, spinner_sink};
use chrono::Utc;
use std::sync::Arc;

/// Execute the migrate command.
///
/// The returned report may describe a rejected or failed run; the caller
/// decides the exit code. Real runs take a lease recorded in the database,
/// so a second `fmig migrate` against the same workspace is rejected while
/// one is running.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened or output fails.
pub fn execute(args: &MigrateArgs, json: bool, cli: &CliOverrides) -> Result<ImportReport> {
    let workspace = Workspace::open(cli, None)?;
    let config = &workspace.config;

    let backups = HistoryBackupService::new(
        workspace.store.clone(),
        workspace.paths.backup_dir.clone(),
        config.history(),
    );
    let targets = Collaborators::from_store(&workspace.store)
        .with_backups(Arc::new(backups))
        .with_lease(workspace.store.clone());

    let store = workspace.store.clone();
    let pipeline = MigrationPipeline::new(Arc::new(MigrationLocks::new()), targets)
        .with_settings(config.settings())
        .on_complete(Box::new(move || {
            store.set_metadata("last_migration_at", &Utc::now().to_rfc3339())
        }));

    let spinner = create_spinner("Migrating", !json && should_show_progress());
    let options = ImportOptions {
        dry_run: args.dry_run,
        overwrite_existing: args.overwrite,
        skip_zones: args.skip_zones,
        skip_power: args.skip_power,
        create_backup: config.backup && !args.no_backup,
        progress: Some(spinner_sink(&spinner)),
    };

    let adapter = args.source.kind.adapter();
    let report = pipeline.run(adapter.as_ref(), &args.source.source, &options);
    spinner.finish_and_clear();

    if json {
        print_json(&report)?;
    } else {
        print!("{report}");
    }
    Ok(report)
}
