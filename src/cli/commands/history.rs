use crate::cli::HistoryArgs;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides, ConfigPaths};
use crate::error::Result;
use crate::storage::backup::{BackupEntry, list_backups};
use serde_json::json;

/// Execute the history command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be found or the backup directory
/// cannot be read.
pub fn execute(args: &HistoryArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let factions_dir = config::discover_factions_dir(None)?;
    let paths = ConfigPaths::resolve(&factions_dir, cli.db.as_ref());
    let mut backups = list_backups(&paths.backup_dir)?;
    if args.limit > 0 {
        backups.truncate(args.limit);
    }

    if json {
        let items: Vec<_> = backups.iter().map(entry_json).collect();
        return print_json(&json!({
            "directory": paths.backup_dir.display().to_string(),
            "count": backups.len(),
            "backups": items,
        }));
    }

    if backups.is_empty() {
        println!("No backups found in {}", paths.backup_dir.display());
        return Ok(());
    }

    println!("Backups in {}:", paths.backup_dir.display());
    println!("{:<14} {:<20} {:>10}  {:<23}", "KIND", "LABEL", "SIZE", "TIMESTAMP");
    println!("{}", "-".repeat(70));
    for entry in &backups {
        println!(
            "{:<14} {:<20} {:>10}  {:<23}",
            entry.kind,
            entry.label,
            format_size(entry.size),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn entry_json(entry: &BackupEntry) -> serde_json::Value {
    json!({
        "filename": entry.path.file_name().unwrap_or_default().to_string_lossy(),
        "kind": entry.kind,
        "label": entry.label,
        "size_bytes": entry.size,
        "size": format_size(entry.size),
        "timestamp": entry.timestamp.to_rfc3339(),
        "sha256": entry.metadata.as_ref().map(|m| m.sha256.clone()),
        "actor": entry.metadata.as_ref().and_then(|m| m.actor.clone()),
    })
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
