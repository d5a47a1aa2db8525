//! Database schema for the faction store.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the faction database.
pub const SCHEMA_SQL: &str = r"
    -- Factions
    CREATE TABLE IF NOT EXISTS factions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        tag TEXT NOT NULL,
        color TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL,
        home_json TEXT,
        permissions_json TEXT NOT NULL DEFAULT '{}',
        CHECK (length(name) >= 1),
        CHECK (length(tag) >= 2 AND length(tag) <= 4)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_factions_name ON factions(name COLLATE NOCASE);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_factions_tag ON factions(tag COLLATE NOCASE);

    -- Members: one faction per player
    CREATE TABLE IF NOT EXISTS members (
        player_id TEXT PRIMARY KEY,
        faction_id TEXT NOT NULL,
        username TEXT NOT NULL,
        role TEXT NOT NULL,
        joined_at TEXT NOT NULL,
        last_online TEXT NOT NULL,
        FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_members_faction_id ON members(faction_id);

    -- Claims: one faction per chunk
    CREATE TABLE IF NOT EXISTS claims (
        world TEXT NOT NULL,
        x INTEGER NOT NULL,
        z INTEGER NOT NULL,
        faction_id TEXT NOT NULL,
        PRIMARY KEY (world, x, z),
        FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_claims_faction_id ON claims(faction_id);

    -- Relations
    CREATE TABLE IF NOT EXISTS relations (
        faction_id TEXT NOT NULL,
        other_id TEXT NOT NULL,
        relation TEXT NOT NULL,
        PRIMARY KEY (faction_id, other_id),
        FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
    );

    -- Faction audit log
    CREATE TABLE IF NOT EXISTS faction_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        faction_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        actor TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (faction_id) REFERENCES factions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_faction_logs_faction_id ON faction_logs(faction_id);

    -- Zones
    CREATE TABLE IF NOT EXISTS zones (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        world TEXT NOT NULL,
        created_by TEXT,
        created_at TEXT NOT NULL,
        flags_json TEXT NOT NULL DEFAULT '{}'
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_zones_name ON zones(name COLLATE NOCASE);

    -- Zone chunks: one zone per chunk
    CREATE TABLE IF NOT EXISTS zone_chunks (
        world TEXT NOT NULL,
        x INTEGER NOT NULL,
        z INTEGER NOT NULL,
        zone_id TEXT NOT NULL,
        PRIMARY KEY (world, x, z),
        FOREIGN KEY (zone_id) REFERENCES zones(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_zone_chunks_zone_id ON zone_chunks(zone_id);

    -- Player power
    CREATE TABLE IF NOT EXISTS player_power (
        player_id TEXT PRIMARY KEY,
        power REAL NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- Disband record (factions are deleted, the record stays)
    CREATE TABLE IF NOT EXISTS disbanded (
        faction_id TEXT NOT NULL,
        name TEXT NOT NULL,
        reason TEXT NOT NULL,
        disbanded_at TEXT NOT NULL
    );

    -- Config (Runtime)
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Metadata
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    // WAL lets readers (fmig list) run next to a migration
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["factions", "members", "claims", "zones", "zone_chunks", "player_power"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }

        let foreign_keys: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn test_apply_schema_twice() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
    }
}
