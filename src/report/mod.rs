//! Result records for validation and import runs.
//!
//! Both reports are plain serializable data. Components accumulate into a
//! mutable tally (`ImportTally`, `ValidationTally`) and freeze it into the
//! report once the run ends; nothing mutates a report after that.

use crate::source::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a migration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Ran to the end. Individual records may still have been skipped.
    Completed,
    /// Refused before any I/O (another migration held the guard).
    Rejected,
    /// Aborted during I/O (primary listing missing or unreadable).
    Failed,
}

impl RunOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Counters of an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub factions_imported: usize,
    pub factions_skipped: usize,
    pub claims_imported: usize,
    pub claims_dropped: usize,
    pub zones_created: usize,
    pub players_with_power: usize,
    pub players_moved: usize,
    pub leadership_successions: usize,
    pub factions_disbanded: usize,
}

/// Result of an actual or simulated migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub source_kind: SourceKind,
    pub outcome: RunOutcome,
    pub dry_run: bool,
    #[serde(flatten)]
    pub counts: ImportCounts,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportReport {
    /// Completed with no errors. Warnings are allowed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.errors.is_empty()
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(
            f,
            "Migration from {} {}{mode}",
            self.source_kind,
            self.outcome.as_str()
        )?;
        writeln!(
            f,
            "  Factions: {} imported, {} skipped",
            c.factions_imported, c.factions_skipped
        )?;
        writeln!(
            f,
            "  Claims:   {} imported, {} dropped",
            c.claims_imported, c.claims_dropped
        )?;
        writeln!(f, "  Zones:    {} created", c.zones_created)?;
        writeln!(
            f,
            "  Members:  {} moved, {} successions, {} factions disbanded",
            c.players_moved, c.leadership_successions, c.factions_disbanded
        )?;
        writeln!(f, "  Power:    {} players credited", c.players_with_power)?;
        if let Some(path) = &self.backup_path {
            writeln!(f, "  Backup:   {path}")?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

/// Mutable accumulator for an `ImportReport`.
#[derive(Debug, Clone)]
pub struct ImportTally {
    pub source_kind: SourceKind,
    pub dry_run: bool,
    pub counts: ImportCounts,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub backup_path: Option<String>,
    started_at: DateTime<Utc>,
}

impl ImportTally {
    #[must_use]
    pub fn new(source_kind: SourceKind, dry_run: bool) -> Self {
        Self {
            source_kind,
            dry_run,
            counts: ImportCounts::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
            backup_path: None,
            started_at: Utc::now(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind = %self.source_kind, "{message}");
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(kind = %self.source_kind, "{message}");
        self.errors.push(message);
    }

    /// Freeze into a report.
    #[must_use]
    pub fn finish(self, outcome: RunOutcome) -> ImportReport {
        ImportReport {
            source_kind: self.source_kind,
            outcome,
            dry_run: self.dry_run,
            counts: self.counts,
            warnings: self.warnings,
            errors: self.errors,
            backup_path: self.backup_path,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Category of a validation conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Id,
    Name,
    Member,
}

/// One conflict found during validation. Conflicts never block validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Source faction the conflict was found on (id or name).
    pub faction: String,
    /// The other side: a faction in the batch or in the target store.
    pub other: String,
    /// True when `other` lives in the target store rather than the batch.
    pub existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    pub detail: String,
}

/// Result of a read-only pre-flight pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub source_kind: SourceKind,
    /// False only on structural failure, never on a conflict.
    pub valid: bool,
    pub total_factions: usize,
    pub total_members: usize,
    pub total_claims: usize,
    pub total_zone_chunks: usize,
    pub conflicts: Vec<Conflict>,
    pub invalid_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn conflicts_of(&self, kind: ConflictKind) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| c.kind == kind).collect()
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.valid { "valid" } else { "INVALID" };
        writeln!(f, "Validation of {} source: {verdict}", self.source_kind)?;
        writeln!(
            f,
            "  {} factions, {} members, {} claims, {} zone chunks",
            self.total_factions, self.total_members, self.total_claims, self.total_zone_chunks
        )?;
        if !self.has_conflicts() {
            writeln!(f, "  no conflicts")?;
        }
        for conflict in &self.conflicts {
            let scope = if conflict.existing { "existing" } else { "batch" };
            writeln!(
                f,
                "  conflict [{:?}/{scope}] {}: {}",
                conflict.kind, conflict.faction, conflict.detail
            )?;
        }
        for id in &self.invalid_ids {
            writeln!(f, "  invalid id: {id}")?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

/// Mutable accumulator for a `ValidationReport`.
#[derive(Debug, Clone)]
pub struct ValidationTally {
    pub source_kind: SourceKind,
    pub listing_readable: bool,
    pub total_factions: usize,
    pub total_members: usize,
    pub total_claims: usize,
    pub total_zone_chunks: usize,
    pub conflicts: Vec<Conflict>,
    pub invalid_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationTally {
    #[must_use]
    pub const fn new(source_kind: SourceKind) -> Self {
        Self {
            source_kind,
            listing_readable: true,
            total_factions: 0,
            total_members: 0,
            total_claims: 0,
            total_zone_chunks: 0,
            conflicts: Vec::new(),
            invalid_ids: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn conflict(
        &mut self,
        kind: ConflictKind,
        faction: impl Into<String>,
        other: impl Into<String>,
        existing: bool,
        player: Option<String>,
        detail: impl Into<String>,
    ) {
        self.conflicts.push(Conflict {
            kind,
            faction: faction.into(),
            other: other.into(),
            existing,
            player,
            detail: detail.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Freeze into a report. Valid iff the listing was readable and at
    /// least one faction parsed.
    #[must_use]
    pub fn finish(self) -> ValidationReport {
        ValidationReport {
            source_kind: self.source_kind,
            valid: self.listing_readable && self.total_factions > 0,
            total_factions: self.total_factions,
            total_members: self.total_members,
            total_claims: self.total_claims,
            total_zone_chunks: self.total_zone_chunks,
            conflicts: self.conflicts,
            invalid_ids: self.invalid_ids,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_freezes_counts() {
        let mut tally = ImportTally::new(SourceKind::Jsonl, true);
        tally.counts.factions_imported = 3;
        tally.warn("dropped field 'points'");
        let report = tally.finish(RunOutcome::Completed);

        assert!(report.dry_run);
        assert!(report.is_success());
        assert!(report.has_warnings());
        assert_eq!(report.counts.factions_imported, 3);
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_rejected_is_not_success() {
        let mut tally = ImportTally::new(SourceKind::Directory, false);
        tally.error("A directory migration is already in progress");
        let report = tally.finish(RunOutcome::Rejected);
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_json_is_flat() {
        let report = ImportTally::new(SourceKind::Jsonl, false).finish(RunOutcome::Completed);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["factions_imported"], 0);
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["source_kind"], "jsonl");
        assert!(json.get("backup_path").is_none());
    }

    #[test]
    fn test_validation_valid_requires_a_faction() {
        let empty = ValidationTally::new(SourceKind::Jsonl).finish();
        assert!(!empty.valid);

        let mut tally = ValidationTally::new(SourceKind::Jsonl);
        tally.total_factions = 1;
        tally.conflict(ConflictKind::Name, "Alpha", "alpha", true, None, "name taken");
        let report = tally.finish();
        assert!(report.valid);
        assert!(report.has_conflicts());
        assert_eq!(report.conflicts_of(ConflictKind::Name).len(), 1);
        assert!(report.conflicts_of(ConflictKind::Id).is_empty());
        assert!(!report.to_string().contains("no conflicts"));
    }

    #[test]
    fn test_validation_display_without_conflicts() {
        let mut tally = ValidationTally::new(SourceKind::Directory);
        tally.total_factions = 2;
        let report = tally.finish();
        assert!(!report.has_conflicts());
        assert!(report.to_string().contains("  no conflicts"));
    }

    #[test]
    fn test_display_mentions_dry_run() {
        let report = ImportTally::new(SourceKind::Directory, true).finish(RunOutcome::Completed);
        let text = report.to_string();
        assert!(text.contains("(dry run)"));
        assert!(text.contains("directory completed"));
    }
}
