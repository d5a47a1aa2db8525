//! `SQLite` faction store.

use crate::error::{MigrationError, Result};
use crate::model::{
    ChunkCoordinate, Faction, FactionId, FactionLogEntry, Home, LogKind, Member, PlayerId,
    Relation, Role, Zone, ZoneKind,
};
use crate::storage::schema::apply_schema;
use crate::storage::{
    ClaimIndex, FactionStore, PowerLedger, RunLease, ZoneRequest, ZoneStore,
};
use crate::util::generate_unique_tag;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Default per-player power cap.
pub const DEFAULT_MAX_POWER: f64 = 100.0;

/// Metadata key holding the cross-process migration lease.
pub const LEASE_KEY: &str = "migration_lease";

/// A lease older than this is treated as left behind by a dead process.
const LEASE_STALE_AFTER_SECS: i64 = 6 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    kind: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// SQLite-based faction, zone, claim and power store.
///
/// The connection sits behind a mutex so zone creation can be issued from
/// several threads at once; writes still serialize on the connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    max_power: f64,
    claim_index: RwLock<HashMap<ChunkCoordinate, FactionId>>,
    batch_depth: AtomicUsize,
    pending_zone_changes: AtomicUsize,
    zone_revision: AtomicU64,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let revision = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'zone_revision'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let store = Self {
            conn: Mutex::new(conn),
            path,
            max_power: DEFAULT_MAX_POWER,
            claim_index: RwLock::new(HashMap::new()),
            batch_depth: AtomicUsize::new(0),
            pending_zone_changes: AtomicUsize::new(0),
            zone_revision: AtomicU64::new(revision),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Set the per-player power cap.
    #[must_use]
    pub const fn with_max_power(mut self, max_power: f64) -> Self {
        self.max_power = max_power;
        self
    }

    /// Database file path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MigrationError::store_write("database", "connection lock poisoned"))
    }

    /// Fetch a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Fetch all config values from the config table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_factions(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT count(*) FROM factions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Every zone with its chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_zones(&self) -> Result<Vec<Zone>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, kind, world, created_by, created_at, flags_json
             FROM zones ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut zones = Vec::new();
        for row in rows {
            let (id, name, kind, world, created_by, created_at, flags_json) = row?;
            let id = Uuid::parse_str(&id).map_err(|_| MigrationError::InvalidId { id })?;
            zones.push(Zone {
                id,
                name,
                kind: kind.parse()?,
                world,
                chunks: std::collections::BTreeSet::new(),
                created_by: created_by.and_then(|p| p.parse().ok()),
                created_at: parse_datetime(&created_at),
                flags: serde_json::from_str(&flags_json)?,
            });
        }
        drop(stmt);

        let mut chunk_stmt = conn.prepare("SELECT zone_id, world, x, z FROM zone_chunks")?;
        let chunk_rows = chunk_stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ChunkCoordinate::new(row.get::<_, String>(1)?, row.get(2)?, row.get(3)?),
            ))
        })?;
        let mut by_zone: HashMap<String, Vec<ChunkCoordinate>> = HashMap::new();
        for row in chunk_rows {
            let (zone_id, chunk) = row?;
            by_zone.entry(zone_id).or_default().push(chunk);
        }
        for zone in &mut zones {
            if let Some(chunks) = by_zone.remove(&zone.id.to_string()) {
                zone.chunks.extend(chunks);
            }
        }
        Ok(zones)
    }

    /// Zone revision; bumps once per batch (or per unbatched creation).
    #[must_use]
    pub fn zone_revision(&self) -> u64 {
        self.zone_revision.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn power_of(&self, player: &PlayerId) -> Result<Option<f64>> {
        let conn = self.conn()?;
        let power = conn
            .query_row(
                "SELECT power FROM player_power WHERE player_id = ?",
                [player.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(power)
    }

    /// Reason recorded when the faction was disbanded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn disband_reason(&self, id: &FactionId) -> Result<Option<String>> {
        let conn = self.conn()?;
        let reason = conn
            .query_row(
                "SELECT reason FROM disbanded WHERE faction_id = ?
                 ORDER BY disbanded_at DESC LIMIT 1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reason)
    }

    /// Write a consistent copy of the database to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` exists or the copy fails.
    pub fn snapshot_into(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(MigrationError::Backup(format!(
                "snapshot target already exists: {}",
                dest.display()
            )));
        }
        let dest_str = dest.to_string_lossy().to_string();
        self.conn()?.execute("VACUUM INTO ?", [dest_str])?;

        // A restored snapshot must not come back holding the live lease.
        let copy = Connection::open(dest)?;
        copy.execute("DELETE FROM metadata WHERE key = ?", [LEASE_KEY])?;
        Ok(())
    }

    fn note_zone_change(&self) {
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            self.pending_zone_changes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.bump_zone_revision();
        }
    }

    fn bump_zone_revision(&self) {
        let revision = self.zone_revision.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.set_metadata("zone_revision", &revision.to_string()) {
            tracing::warn!(error = %e, "Failed to persist zone revision");
        }
        tracing::debug!(revision, "Zone revision bumped");
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }

    Utc::now()
}

type FactionRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
);

/// Load factions with all their children. `only` restricts to one id.
#[allow(clippy::too_many_lines)]
fn read_factions(conn: &Connection, only: Option<&FactionId>) -> Result<Vec<Faction>> {
    let filter = only.map(ToString::to_string);
    let where_clause = if filter.is_some() { " WHERE id = ?1" } else { "" };
    let child_clause = if filter.is_some() {
        " WHERE faction_id = ?1"
    } else {
        ""
    };
    let params: Vec<&dyn rusqlite::ToSql> = match &filter {
        Some(id) => vec![id],
        None => Vec::new(),
    };

    let mut factions: BTreeMap<String, Faction> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, tag, color, description, created_at, home_json, permissions_json
             FROM factions{where_clause}"
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;
        for row in rows {
            let (id, name, tag, color, description, created_at, home_json, permissions_json): FactionRow =
                row?;
            let mut faction = Faction::new(id.parse()?, name, tag);
            faction.color = color;
            faction.description = description;
            faction.created_at = parse_datetime(&created_at);
            faction.home = home_json
                .map(|json| serde_json::from_str::<Home>(&json))
                .transpose()?;
            faction.permissions = serde_json::from_str(&permissions_json)?;
            factions.insert(id, faction);
        }
    }

    {
        let mut stmt = conn.prepare(&format!(
            "SELECT faction_id, player_id, username, role, joined_at, last_online
             FROM members{child_clause}"
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        for row in rows {
            let (faction_id, player_id, username, role, joined_at, last_online) = row?;
            if let Some(faction) = factions.get_mut(&faction_id) {
                let player_id: PlayerId = player_id.parse()?;
                faction.members.insert(
                    player_id,
                    Member {
                        player_id,
                        username,
                        role: role.parse::<Role>()?,
                        joined_at: parse_datetime(&joined_at),
                        last_online: parse_datetime(&last_online),
                    },
                );
            }
        }
    }

    {
        let mut stmt = conn.prepare(&format!(
            "SELECT faction_id, world, x, z FROM claims{child_clause}"
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                ChunkCoordinate::new(row.get::<_, String>(1)?, row.get(2)?, row.get(3)?),
            ))
        })?;
        for row in rows {
            let (faction_id, chunk) = row?;
            if let Some(faction) = factions.get_mut(&faction_id) {
                faction.claims.insert(chunk);
            }
        }
    }

    {
        let mut stmt = conn.prepare(&format!(
            "SELECT faction_id, other_id, relation FROM relations{child_clause}"
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (faction_id, other_id, relation) = row?;
            if let Some(faction) = factions.get_mut(&faction_id) {
                faction
                    .relations
                    .insert(other_id.parse()?, relation.parse::<Relation>()?);
            }
        }
    }

    {
        let mut stmt = conn.prepare(&format!(
            "SELECT faction_id, kind, message, actor, created_at
             FROM faction_logs{child_clause} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            let (faction_id, kind, message, actor, created_at) = row?;
            if let Some(faction) = factions.get_mut(&faction_id) {
                faction.logs.push(FactionLogEntry {
                    at: parse_datetime(&created_at),
                    kind: kind.parse::<LogKind>()?,
                    message,
                    actor: actor.and_then(|a| a.parse().ok()),
                });
            }
        }
    }

    Ok(factions.into_values().collect())
}

fn insert_members(tx: &Transaction<'_>, faction: &Faction) -> Result<()> {
    let id = faction.id.to_string();
    for member in faction.members.values() {
        tx.execute(
            "INSERT INTO members (player_id, faction_id, username, role, joined_at, last_online)
             VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                member.player_id.to_string(),
                id,
                member.username,
                member.role.as_str(),
                member.joined_at.to_rfc3339(),
                member.last_online.to_rfc3339(),
            ],
        )?;
    }
    Ok(())
}

fn insert_logs(tx: &Transaction<'_>, id: &FactionId, logs: &[FactionLogEntry]) -> Result<()> {
    for entry in logs {
        tx.execute(
            "INSERT INTO faction_logs (faction_id, kind, message, actor, created_at)
             VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                id.to_string(),
                entry.kind.as_str(),
                entry.message,
                entry.actor.map(|a| a.to_string()),
                entry.at.to_rfc3339(),
            ],
        )?;
    }
    Ok(())
}

fn insert_faction(tx: &Transaction<'_>, faction: &Faction) -> Result<()> {
    let id = faction.id.to_string();
    let home_json = faction.home.as_ref().map(serde_json::to_string).transpose()?;
    tx.execute(
        "INSERT INTO factions (id, name, tag, color, description, created_at, home_json, permissions_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            faction.name,
            faction.tag,
            faction.color,
            faction.description,
            faction.created_at.to_rfc3339(),
            home_json,
            serde_json::to_string(&faction.permissions)?,
        ],
    )?;

    insert_members(tx, faction)?;

    for chunk in &faction.claims {
        tx.execute(
            "INSERT INTO claims (world, x, z, faction_id) VALUES (?, ?, ?, ?)",
            rusqlite::params![chunk.world, chunk.x, chunk.z, id],
        )?;
    }

    for (other, relation) in &faction.relations {
        tx.execute(
            "INSERT INTO relations (faction_id, other_id, relation) VALUES (?, ?, ?)",
            rusqlite::params![id, other.to_string(), relation.as_str()],
        )?;
    }

    insert_logs(tx, &faction.id, &faction.logs)
}

fn faction_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists = conn
        .prepare("SELECT 1 FROM factions WHERE id = ?")?
        .exists([id])?;
    Ok(exists)
}

// ============================================================================
// COLLABORATOR IMPLEMENTATIONS
// ============================================================================

impl FactionStore for SqliteStore {
    fn all_factions(&self) -> Result<Vec<Faction>> {
        let conn = self.conn()?;
        read_factions(&conn, None)
    }

    fn get_faction(&self, id: &FactionId) -> Result<Option<Faction>> {
        let conn = self.conn()?;
        Ok(read_factions(&conn, Some(id))?.into_iter().next())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<FactionId>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM factions WHERE name = ? COLLATE NOCASE",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| id.parse()).transpose()
    }

    fn find_by_tag(&self, tag: &str) -> Result<Option<FactionId>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM factions WHERE tag = ? COLLATE NOCASE",
                [tag],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| id.parse()).transpose()
    }

    fn faction_of_player(&self, player: &PlayerId) -> Result<Option<FactionId>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT faction_id FROM members WHERE player_id = ?",
                [player.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| id.parse()).transpose()
    }

    fn import_faction(&self, faction: &Faction, overwrite: bool) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = faction.id.to_string();

        if faction_exists(&tx, &id)? {
            if !overwrite {
                return Err(MigrationError::store_write(
                    format!("faction {id}"),
                    "already exists",
                ));
            }
            tx.execute("DELETE FROM factions WHERE id = ?", [&id])?;
        }

        insert_faction(&tx, faction)?;
        tx.commit()?;

        tracing::debug!(faction_id = %faction.id, name = %faction.name, "Imported faction");
        Ok(())
    }

    fn update_faction(&self, faction: &Faction) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = faction.id.to_string();

        let updated = tx.execute(
            "UPDATE factions SET name = ?, tag = ?, color = ?, description = ? WHERE id = ?",
            rusqlite::params![
                faction.name,
                faction.tag,
                faction.color,
                faction.description,
                id
            ],
        )?;
        if updated == 0 {
            return Err(MigrationError::FactionNotFound { id });
        }

        tx.execute("DELETE FROM members WHERE faction_id = ?", [&id])?;
        insert_members(&tx, faction)?;

        // Logs are append-only; persist only the entries added since load
        let stored: i64 = tx.query_row(
            "SELECT count(*) FROM faction_logs WHERE faction_id = ?",
            [&id],
            |row| row.get(0),
        )?;
        let stored = usize::try_from(stored).unwrap_or(0);
        if faction.logs.len() > stored {
            insert_logs(&tx, &faction.id, &faction.logs[stored..])?;
        }

        tx.commit()?;
        Ok(())
    }

    fn remove_player_from_index(&self, player: &PlayerId) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM members WHERE player_id = ?", [player.to_string()])?;
        Ok(())
    }

    fn force_disband(&self, id: &FactionId, reason: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id_str = id.to_string();

        let name: Option<String> = tx
            .query_row("SELECT name FROM factions WHERE id = ?", [&id_str], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(name) = name else {
            return Err(MigrationError::FactionNotFound { id: id_str });
        };

        tx.execute(
            "INSERT INTO disbanded (faction_id, name, reason, disbanded_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![id_str, name, reason, Utc::now().to_rfc3339()],
        )?;
        tx.execute("DELETE FROM relations WHERE other_id = ?", [&id_str])?;
        tx.execute("DELETE FROM factions WHERE id = ?", [&id_str])?;
        tx.commit()?;

        tracing::info!(faction_id = %id, name = %name, reason, "Faction disbanded");
        Ok(())
    }

    fn generate_unique_tag(&self, seed: &str, reserved: &HashSet<String>) -> Result<String> {
        let taken: HashSet<String> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare("SELECT lower(tag) FROM factions")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        Ok(generate_unique_tag(seed, |candidate| {
            let key = candidate.to_lowercase();
            taken.contains(&key) || reserved.contains(&key)
        }))
    }
}

impl ZoneStore for SqliteStore {
    fn start_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn end_batch(&self) {
        let previous = self
            .batch_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 && self.pending_zone_changes.swap(0, Ordering::SeqCst) > 0 {
            self.bump_zone_revision();
        }
    }

    fn create_zone_with_chunks(&self, request: &ZoneRequest) -> Result<Zone> {
        let zone = Zone {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            kind: request.kind,
            world: request.world.clone(),
            chunks: request.chunks.clone(),
            created_by: request.creator,
            created_at: Utc::now(),
            flags: request.flags.clone(),
        };

        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;

            let name_taken = tx
                .prepare("SELECT 1 FROM zones WHERE name = ? COLLATE NOCASE")?
                .exists([&zone.name])?;
            if name_taken {
                return Err(MigrationError::ZoneConflict {
                    name: zone.name,
                    reason: "name already in use".to_string(),
                });
            }

            tx.execute(
                "INSERT INTO zones (id, name, kind, world, created_by, created_at, flags_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    zone.id.to_string(),
                    zone.name,
                    zone.kind.as_str(),
                    zone.world,
                    zone.created_by.map(|p| p.to_string()),
                    zone.created_at.to_rfc3339(),
                    serde_json::to_string(&zone.flags)?,
                ],
            )?;

            for chunk in &zone.chunks {
                let owner: Option<String> = tx
                    .query_row(
                        "SELECT z.name FROM zone_chunks c JOIN zones z ON z.id = c.zone_id
                         WHERE c.world = ? AND c.x = ? AND c.z = ?",
                        rusqlite::params![chunk.world, chunk.x, chunk.z],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(owner) = owner {
                    return Err(MigrationError::ZoneConflict {
                        name: zone.name,
                        reason: format!("chunk {chunk} already belongs to zone {owner}"),
                    });
                }
                tx.execute(
                    "INSERT INTO zone_chunks (world, x, z, zone_id) VALUES (?, ?, ?, ?)",
                    rusqlite::params![chunk.world, chunk.x, chunk.z, zone.id.to_string()],
                )?;
            }

            tx.commit()?;
        }

        self.note_zone_change();
        tracing::debug!(zone = %zone.name, kind = %zone.kind, chunks = zone.chunks.len(), "Created zone");
        Ok(zone)
    }

    fn zone_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM zones")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

impl ClaimIndex for SqliteStore {
    fn rebuild_index(&self) -> Result<usize> {
        let mut index = HashMap::new();
        {
            let conn = self.conn()?;
            let mut stmt = conn.prepare("SELECT world, x, z, faction_id FROM claims")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    ChunkCoordinate::new(row.get::<_, String>(0)?, row.get(1)?, row.get(2)?),
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (chunk, faction_id) = row?;
                index.insert(chunk, faction_id.parse()?);
            }
        }

        let count = index.len();
        let mut guard = self
            .claim_index
            .write()
            .map_err(|_| MigrationError::store_write("claim index", "lock poisoned"))?;
        *guard = index;
        tracing::debug!(claims = count, "Rebuilt claim index");
        Ok(count)
    }

    fn owner_of(&self, chunk: &ChunkCoordinate) -> Result<Option<FactionId>> {
        let guard = self
            .claim_index
            .read()
            .map_err(|_| MigrationError::store_write("claim index", "lock poisoned"))?;
        Ok(guard.get(chunk).copied())
    }
}

impl PowerLedger for SqliteStore {
    fn max_power(&self) -> f64 {
        self.max_power
    }

    fn set_power(&self, player: &PlayerId, power: f64) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO player_power (player_id, power, updated_at) VALUES (?, ?, ?)",
            rusqlite::params![player.to_string(), power, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl RunLease for SqliteStore {
    fn acquire_lease(&self, kind: &str, holder: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row("SELECT value FROM metadata WHERE key = ?", [LEASE_KEY], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(raw) = current {
            match serde_json::from_str::<LeaseRecord>(&raw) {
                Ok(lease)
                    if Utc::now() - lease.acquired_at
                        < chrono::Duration::seconds(LEASE_STALE_AFTER_SECS) =>
                {
                    return Err(MigrationError::MigrationInProgress { kind: lease.kind });
                }
                Ok(lease) => tracing::warn!(
                    holder = %lease.holder,
                    pid = lease.pid,
                    acquired_at = %lease.acquired_at,
                    "Taking over stale migration lease"
                ),
                Err(e) => tracing::warn!(error = %e, "Replacing unreadable migration lease"),
            }
        }

        let record = LeaseRecord {
            holder: holder.to_string(),
            kind: kind.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            rusqlite::params![LEASE_KEY, serde_json::to_string(&record)?],
        )?;
        tx.commit()?;

        tracing::debug!(kind, holder, "Migration lease acquired");
        Ok(())
    }

    fn release_lease(&self, holder: &str) -> Result<()> {
        let Some(raw) = self.get_metadata(LEASE_KEY)? else {
            return Ok(());
        };
        let owned = serde_json::from_str::<LeaseRecord>(&raw).is_ok_and(|l| l.holder == holder);
        if owned {
            // Compare on the full value so a lease taken over meanwhile survives.
            self.conn()?.execute(
                "DELETE FROM metadata WHERE key = ? AND value = ?",
                rusqlite::params![LEASE_KEY, raw],
            )?;
            tracing::debug!(holder, "Migration lease released");
        }
        Ok(())
    }
}
