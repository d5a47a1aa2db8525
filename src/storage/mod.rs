//! Target-store collaborators.
//!
//! The migration engine talks to the target only through these traits. The
//! bundled `SqliteStore` implements all of them over one database; a game
//! server embedding the engine would implement them over its own stores.

pub mod backup;
pub mod schema;
pub mod sqlite;

pub use backup::HistoryBackupService;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{ChunkCoordinate, Faction, FactionId, PlayerId, Zone, ZoneKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Faction store operations used by validation, reconciliation and commit.
pub trait FactionStore: Send + Sync {
    /// Snapshot of every faction, including members, claims and relations.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn all_factions(&self) -> Result<Vec<Faction>>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_faction(&self, id: &FactionId) -> Result<Option<Faction>>;

    /// Case-insensitive name lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_by_name(&self, name: &str) -> Result<Option<FactionId>>;

    /// Case-insensitive tag lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_by_tag(&self, tag: &str) -> Result<Option<FactionId>>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn faction_of_player(&self, player: &PlayerId) -> Result<Option<FactionId>>;

    /// Insert a faction, bypassing normal creation limits. With `overwrite`
    /// an existing faction with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the faction exists and `overwrite` is false, or
    /// if a member already belongs to another faction.
    fn import_faction(&self, faction: &Faction, overwrite: bool) -> Result<()>;

    /// Replace an existing faction's members and append its new log entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the faction does not exist or the write fails.
    fn update_faction(&self, faction: &Faction) -> Result<()>;

    /// Drop a player from whatever faction currently holds them.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_player_from_index(&self, player: &PlayerId) -> Result<()>;

    /// Remove a faction regardless of its state and record why.
    ///
    /// # Errors
    ///
    /// Returns an error if the faction does not exist or the write fails.
    fn force_disband(&self, id: &FactionId, reason: &str) -> Result<()>;

    /// Pick a tag derived from `seed` that is free in the store and not in
    /// `reserved` (lowercase tags already handed out in this run).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn generate_unique_tag(&self, seed: &str, reserved: &HashSet<String>) -> Result<String>;
}

/// One zone creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRequest {
    pub name: String,
    pub kind: ZoneKind,
    pub world: String,
    pub creator: Option<PlayerId>,
    pub chunks: BTreeSet<ChunkCoordinate>,
    pub flags: BTreeMap<String, bool>,
}

/// Zone store operations. Creation may be called from several threads.
pub trait ZoneStore: Send + Sync {
    /// Begin a batch; observers see one change when it ends.
    fn start_batch(&self);

    fn end_batch(&self);

    /// # Errors
    ///
    /// Returns an error if the name is taken, a chunk already belongs to
    /// another zone, or the write fails.
    fn create_zone_with_chunks(&self, request: &ZoneRequest) -> Result<Zone>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn zone_names(&self) -> Result<Vec<String>>;
}

/// Chunk -> owning faction lookup kept by the claim subsystem.
pub trait ClaimIndex: Send + Sync {
    /// Rebuild from the current claim set. Returns the number of claims indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be read.
    fn rebuild_index(&self) -> Result<usize>;

    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn owner_of(&self, chunk: &ChunkCoordinate) -> Result<Option<FactionId>>;
}

/// Per-player power values.
pub trait PowerLedger: Send + Sync {
    /// Per-player cap configured on the target.
    fn max_power(&self) -> f64;

    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_power(&self, player: &PlayerId, power: f64) -> Result<()>;
}

/// What triggered a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    PreMigration,
    Manual,
}

impl BackupKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreMigration => "pre_migration",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata of a finished backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub kind: BackupKind,
    pub label: String,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Snapshot provider consulted before a real migration.
pub trait BackupService: Send + Sync {
    /// # Errors
    ///
    /// Returns `MigrationError::Backup` (or an I/O error) if the snapshot
    /// could not be written.
    fn create_backup(
        &self,
        kind: BackupKind,
        label: &str,
        actor: Option<&str>,
    ) -> Result<BackupMetadata>;
}

/// Exclusion between processes that share one target.
///
/// The in-process `MigrationLocks` only see runs inside one process. A lease
/// is recorded in the target itself so separate invocations against the same
/// database refuse each other.
pub trait RunLease: Send + Sync {
    /// Take the lease for a `kind` run on behalf of `holder`, without waiting.
    ///
    /// # Errors
    ///
    /// Returns `MigrationInProgress` naming the live holder's kind, or a
    /// store error.
    fn acquire_lease(&self, kind: &str, holder: &str) -> Result<()>;

    /// Drop the lease if `holder` still owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn release_lease(&self, holder: &str) -> Result<()>;
}
