use crate::config::{BACKUP_DIR, DEFAULT_DB_FILENAME, FACTIONS_DIR};
use crate::error::{MigrationError, Result};
use crate::storage::SqliteStore;
use std::fs;
use std::path::Path;

const CONFIG_TEMPLATE: &str = r"# Faction migration configuration
# actor: admin
# max-power: 100
# known-worlds: [world, world_nether, world_the_end]
# backup: true
# backup-max-count: 20
# backup-max-age-days: 30
# safe-zone-prefix: SafeZone
# war-zone-prefix: WarZone
";

const GITIGNORE: &str = r"# Database
*.db
*.db-shm
*.db-wal

# Snapshots
backups/
";

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(force: bool, root_dir: Option<&Path>) -> Result<()> {
    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let factions_dir = base_dir.join(FACTIONS_DIR);
    let db_path = factions_dir.join(DEFAULT_DB_FILENAME);

    if db_path.exists() {
        if !force {
            return Err(MigrationError::AlreadyInitialized { path: db_path });
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut path = db_path.clone().into_os_string();
            path.push(suffix);
            if Path::new(&path).exists() {
                fs::remove_file(&path)?;
            }
        }
    }
    fs::create_dir_all(factions_dir.join(BACKUP_DIR))?;

    let store = SqliteStore::open(&db_path)?;
    store.set_metadata("created_by", "fmig init")?;

    let config_path = factions_dir.join("config.yaml");
    if !config_path.exists() {
        fs::write(config_path, CONFIG_TEMPLATE)?;
    }
    let gitignore_path = factions_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, GITIGNORE)?;
    }

    tracing::info!(path = %db_path.display(), "Initialized workspace");
    println!("Initialized faction store in {FACTIONS_DIR}/");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Faction, FactionId};
    use crate::storage::FactionStore;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_workspace() {
        let temp_dir = TempDir::new().unwrap();
        execute(false, Some(temp_dir.path())).unwrap();

        let dir = temp_dir.path().join(FACTIONS_DIR);
        assert!(dir.join(DEFAULT_DB_FILENAME).exists());
        assert!(dir.join(BACKUP_DIR).is_dir());
        assert!(dir.join("config.yaml").exists());
        assert!(fs::read_to_string(dir.join(".gitignore")).unwrap().contains("*.db"));
    }

    #[test]
    fn test_init_twice_requires_force() {
        let temp_dir = TempDir::new().unwrap();
        execute(false, Some(temp_dir.path())).unwrap();

        let err = execute(false, Some(temp_dir.path())).unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyInitialized { .. }));
    }

    #[test]
    fn test_force_resets_store() {
        let temp_dir = TempDir::new().unwrap();
        execute(false, Some(temp_dir.path())).unwrap();
        let db_path = temp_dir.path().join(FACTIONS_DIR).join(DEFAULT_DB_FILENAME);
        {
            let store = SqliteStore::open(&db_path).unwrap();
            let faction = Faction::new(FactionId::new_random(), "Alpha", "ALP");
            store.import_faction(&faction, false).unwrap();
            assert_eq!(store.count_factions().unwrap(), 1);
        }

        execute(true, Some(temp_dir.path())).unwrap();
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.count_factions().unwrap(), 0);
    }
}
