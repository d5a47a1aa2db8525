use crate::cli::ListArgs;
use crate::cli::commands::{Workspace, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::model::Faction;
use crate::storage::FactionStore;
use serde::Serialize;

/// One row of `fmig list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactionSummary {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub leader: Option<String>,
    pub members: usize,
    pub claims: usize,
}

impl From<&Faction> for FactionSummary {
    fn from(faction: &Faction) -> Self {
        Self {
            id: faction.id.to_string(),
            name: faction.name.clone(),
            tag: faction.tag.clone(),
            leader: faction.leader().map(|m| m.username.clone()),
            members: faction.members.len(),
            claims: faction.claims.len(),
        }
    }
}

/// Filter and sort factions for display: by name, case-insensitively.
#[must_use]
pub fn summarize(factions: &[Faction], args: &ListArgs) -> Vec<FactionSummary> {
    let needle = args.name.as_deref().map(str::to_lowercase);
    let mut rows: Vec<FactionSummary> = factions
        .iter()
        .filter(|f| {
            needle
                .as_deref()
                .is_none_or(|n| f.name.to_lowercase().contains(n))
        })
        .map(FactionSummary::from)
        .collect();
    rows.sort_by_key(|r| r.name.to_lowercase());
    if args.limit > 0 {
        rows.truncate(args.limit);
    }
    rows
}

/// Execute the list command.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn execute(args: &ListArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let workspace = Workspace::open(cli, None)?;
    let rows = summarize(&workspace.store.all_factions()?, args);

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No factions found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<5} {:<16} {:>7} {:>7}",
        "NAME", "TAG", "LEADER", "MEMBERS", "CLAIMS"
    );
    println!("{}", "-".repeat(63));
    for row in rows {
        println!(
            "{:<24} {:<5} {:<16} {:>7} {:>7}",
            row.name,
            row.tag,
            row.leader.as_deref().unwrap_or("-"),
            row.members,
            row.claims
        );
    }
    Ok(())
}
