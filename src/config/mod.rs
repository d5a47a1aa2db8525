//! Configuration management for `faction_migrate`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`FMIG_*`)
//! 3. Project config (.factions/config.yaml)
//! 4. User config (~/.config/fmig/config.yaml)
//! 5. DB config table
//! 6. Defaults

use crate::error::{MigrationError, Result};
use crate::migrate::MigrationSettings;
use crate::storage::SqliteStore;
use crate::storage::backup::HistoryConfig;
use crate::storage::sqlite::DEFAULT_MAX_POWER;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Workspace directory name.
pub const FACTIONS_DIR: &str = ".factions";
/// Database filename inside the workspace.
pub const DEFAULT_DB_FILENAME: &str = "factions.db";
/// Backup directory name inside the workspace.
pub const BACKUP_DIR: &str = "backups";

const ENV_PREFIX: &str = "FMIG_";

/// Resolved paths for this workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub factions_dir: PathBuf,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl ConfigPaths {
    /// Resolve paths, honoring a `db` override (relative paths are taken
    /// from the workspace directory).
    #[must_use]
    pub fn resolve(factions_dir: &Path, db_override: Option<&PathBuf>) -> Self {
        let db_path = match db_override {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => factions_dir.join(path),
            None => factions_dir.join(DEFAULT_DB_FILENAME),
        };
        Self {
            factions_dir: factions_dir.to_path_buf(),
            db_path,
            backup_dir: factions_dir.join(BACKUP_DIR),
        }
    }
}

/// Discover the active `.factions` directory.
///
/// Honors `FMIG_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns `NotInitialized` if no workspace is found.
pub fn discover_factions_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(value) = env::var("FMIG_DIR") {
        let path = PathBuf::from(value.trim());
        if !value.trim().is_empty() && path.is_dir() {
            return Ok(path);
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(FACTIONS_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            return Err(MigrationError::NotInitialized);
        }
    }
}

/// Open the workspace store using startup config for the path.
///
/// # Errors
///
/// Returns an error if config cannot be read or the database cannot be opened.
pub fn open_store(
    factions_dir: &Path,
    db_override: Option<&PathBuf>,
) -> Result<(SqliteStore, ConfigPaths)> {
    let startup = load_startup_config(factions_dir)?;
    let resolved = db_override
        .cloned()
        .or_else(|| db_override_from_layer(&startup));
    let paths = ConfigPaths::resolve(factions_dir, resolved.as_ref());
    if !paths.db_path.exists() {
        return Err(MigrationError::StoreNotFound {
            path: paths.db_path,
        });
    }
    let store = SqliteStore::open_with_timeout(&paths.db_path, Some(30_000))?;
    Ok((store, paths))
}

/// A configuration layer split into startup-only and runtime (DB) keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub startup: HashMap<String, String>,
    pub runtime: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        self.startup
            .extend(other.startup.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.runtime
            .extend(other.runtime.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Merge layers given lowest precedence first.
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file. Missing files yield an empty layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `FMIG_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                if stripped == "DIR" {
                    continue;
                }
                insert_key_value(&mut layer, &normalize_key(stripped), value);
            }
        }
        layer
    }

    /// Build a layer from the store's config table. Startup keys stored
    /// there are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the config table cannot be read.
    pub fn from_db(store: &SqliteStore) -> Result<Self> {
        let mut layer = Self::default();
        for (key, value) in store.get_all_config()? {
            let key = normalize_key(&key);
            if !is_startup_key(&key) {
                layer.runtime.insert(key, value);
            }
        }
        Ok(layer)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        let key = normalize_key(key);
        self.startup.get(&key).or_else(|| self.runtime.get(&key))
    }
}

/// CLI overrides for config loading.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub actor: Option<String>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        if let Some(path) = &self.db {
            insert_key_value(&mut layer, "db", path.to_string_lossy().to_string());
        }
        if let Some(actor) = &self.actor {
            insert_key_value(&mut layer, "actor", actor.clone());
        }
        layer
    }
}

/// Load project config (.factions/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(factions_dir: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&factions_dir.join("config.yaml"))
}

/// Load user config (~/.config/fmig/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("fmig")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load the layers that can be read before the store is open.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_startup_config(factions_dir: &Path) -> Result<ConfigLayer> {
    Ok(ConfigLayer::merge_layers(&[
        load_user_config()?,
        load_project_config(factions_dir)?,
        ConfigLayer::from_env(),
    ]))
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    for (key, value) in [
        ("max-power", DEFAULT_MAX_POWER.to_string()),
        ("backup", "true".to_string()),
        ("backup-max-count", "20".to_string()),
        ("backup-max-age-days", "30".to_string()),
        ("safe-zone-prefix", "SafeZone".to_string()),
        ("war-zone-prefix", "WarZone".to_string()),
    ] {
        layer.runtime.insert(key.to_string(), value);
    }
    layer
}

/// Load configuration with full precedence.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed, or DB access fails.
pub fn load_config(
    factions_dir: &Path,
    store: Option<&SqliteStore>,
    cli: &CliOverrides,
) -> Result<ConfigLayer> {
    let db_layer = match store {
        Some(store) => ConfigLayer::from_db(store)?,
        None => ConfigLayer::default(),
    };
    Ok(ConfigLayer::merge_layers(&[
        default_config_layer(),
        db_layer,
        load_user_config()?,
        load_project_config(factions_dir)?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]))
}

/// Typed view of the keys the migration commands use.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub actor: Option<String>,
    pub max_power: f64,
    pub known_worlds: Vec<String>,
    pub backup: bool,
    pub backup_max_count: usize,
    pub backup_max_age_days: u32,
    pub safe_zone_prefix: String,
    pub war_zone_prefix: String,
}

impl MigrationConfig {
    /// Read typed values out of a merged layer.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first malformed key.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let text = |key: &str, default: &str| {
            layer
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let max_power: f64 = parse_key(layer, "max-power", DEFAULT_MAX_POWER)?;
        if !max_power.is_finite() || max_power < 0.0 {
            return Err(MigrationError::Config(format!(
                "max-power must be a non-negative number, got {max_power}"
            )));
        }
        let backup = match layer.get("backup") {
            None => true,
            Some(value) => parse_bool(value).ok_or_else(|| {
                MigrationError::Config(format!("backup: expected a boolean, got '{value}'"))
            })?,
        };

        Ok(Self {
            actor: actor_from_layer(layer),
            max_power,
            known_worlds: layer
                .get("known-worlds")
                .map(|v| split_list(v))
                .unwrap_or_default(),
            backup,
            backup_max_count: parse_key(layer, "backup-max-count", 20)?,
            backup_max_age_days: parse_key(layer, "backup-max-age-days", 30)?,
            safe_zone_prefix: text("safe-zone-prefix", "SafeZone"),
            war_zone_prefix: text("war-zone-prefix", "WarZone"),
        })
    }

    #[must_use]
    pub fn settings(&self) -> MigrationSettings {
        MigrationSettings {
            known_worlds: self.known_worlds.clone(),
            safe_prefix: self.safe_zone_prefix.clone(),
            war_prefix: self.war_zone_prefix.clone(),
            actor: self.actor.clone(),
        }
    }

    #[must_use]
    pub const fn history(&self) -> HistoryConfig {
        HistoryConfig {
            max_count: self.backup_max_count,
            max_age_days: self.backup_max_age_days,
        }
    }
}

/// Resolve actor from a merged config layer.
#[must_use]
pub fn actor_from_layer(layer: &ConfigLayer) -> Option<String> {
    layer
        .get("actor")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Keys that only make sense before the store is open.
#[must_use]
pub fn is_startup_key(key: &str) -> bool {
    matches!(normalize_key(key).as_str(), "db" | "actor")
}

fn parse_key<T: std::str::FromStr>(layer: &ConfigLayer, key: &str, default: T) -> Result<T> {
    match layer.get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            MigrationError::Config(format!("{key}: cannot parse '{value}'"))
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn insert_key_value(layer: &mut ConfigLayer, key: &str, value: String) {
    let key = normalize_key(key);
    if is_startup_key(&key) {
        layer.startup.insert(key, value);
    } else {
        layer.runtime.insert(key, value);
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn db_override_from_layer(layer: &ConfigLayer) -> Option<PathBuf> {
    layer
        .startup
        .get("db")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);
    for (key, value) in flat {
        insert_key_value(&mut layer, &key, value);
    }
    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_resolve() {
        let config = MigrationConfig::from_layer(&default_config_layer()).unwrap();
        assert!((config.max_power - DEFAULT_MAX_POWER).abs() < f64::EPSILON);
        assert!(config.backup);
        assert_eq!(config.backup_max_count, 20);
        assert_eq!(config.safe_zone_prefix, "SafeZone");
        assert!(config.known_worlds.is_empty());
        assert_eq!(config.actor, None);
    }

    #[test]
    fn yaml_lists_become_comma_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(
            &path,
            "known-worlds:\n  - world\n  - world_nether\nmax-power: 50\nactor: admin\n",
        )
        .unwrap();

        let layer = ConfigLayer::from_yaml(&path).unwrap();
        assert_eq!(layer.startup.get("actor").unwrap(), "admin");

        let config = MigrationConfig::from_layer(&layer).unwrap();
        assert_eq!(config.known_worlds, vec!["world", "world_nether"]);
        assert!((config.max_power - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn env_layer_normalizes_keys() {
        let layer = ConfigLayer::from_vars([
            ("FMIG_MAX_POWER".to_string(), "75".to_string()),
            ("FMIG_ACTOR".to_string(), "ops".to_string()),
            ("FMIG_DIR".to_string(), "/tmp/x".to_string()),
            ("OTHER".to_string(), "1".to_string()),
        ]);
        assert_eq!(layer.runtime.get("max-power").unwrap(), "75");
        assert_eq!(layer.startup.get("actor").unwrap(), "ops");
        assert_eq!(layer.runtime.len(), 1);
    }

    #[test]
    fn higher_layers_win() {
        let mut low = ConfigLayer::default();
        low.runtime.insert("max-power".into(), "10".into());
        let mut high = ConfigLayer::default();
        high.runtime.insert("max-power".into(), "20".into());

        let merged = ConfigLayer::merge_layers(&[low, high]);
        assert_eq!(merged.get("MAX_POWER").unwrap(), "20");
    }

    #[test]
    fn cli_overrides_are_startup_keys() {
        let cli = CliOverrides {
            db: Some(PathBuf::from("other.db")),
            actor: Some("alice".into()),
        };
        let layer = cli.as_layer();
        assert_eq!(db_override_from_layer(&layer), Some(PathBuf::from("other.db")));
        assert_eq!(actor_from_layer(&layer).as_deref(), Some("alice"));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let mut layer = default_config_layer();
        layer.runtime.insert("backup".into(), "maybe".into());
        assert!(matches!(
            MigrationConfig::from_layer(&layer),
            Err(MigrationError::Config(_))
        ));

        let mut layer = default_config_layer();
        layer.runtime.insert("max-power".into(), "-1".into());
        assert!(MigrationConfig::from_layer(&layer).is_err());
    }

    #[test]
    fn db_table_skips_startup_keys() {
        let store = SqliteStore::open_memory().unwrap();
        store.set_config("max_power", "42").unwrap();
        store.set_config("actor", "ignored").unwrap();

        let layer = ConfigLayer::from_db(&store).unwrap();
        assert_eq!(layer.runtime.get("max-power").unwrap(), "42");
        assert!(layer.startup.is_empty());
    }

    #[test]
    fn paths_resolve_relative_override() {
        let dir = Path::new("/work/.factions");
        let paths = ConfigPaths::resolve(dir, Some(&PathBuf::from("custom.db")));
        assert_eq!(paths.db_path, dir.join("custom.db"));
        assert_eq!(paths.backup_dir, dir.join(BACKUP_DIR));
        assert_eq!(
            ConfigPaths::resolve(dir, None).db_path,
            dir.join(DEFAULT_DB_FILENAME)
        );
    }

    #[test]
    fn discover_walks_up() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join(FACTIONS_DIR);
        fs::create_dir_all(&root).unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        if env::var("FMIG_DIR").is_err() {
            assert_eq!(discover_factions_dir(Some(&nested)).unwrap(), root);
        }
    }
}
