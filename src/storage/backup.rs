//! Pre-migration snapshots of the faction database.
//!
//! This module handles:
//! - Writing timestamped snapshots of the store before a migration
//! - Rotating snapshots based on count and age
//! - Listing snapshots for `fmig history`
//!
//! Snapshots are named `<kind>.<label>.<YYYYMMDD_HHMMSS_mmm>.db`, with a
//! `<same name>.json` sidecar holding the `BackupMetadata`.

use crate::error::Result;
use crate::storage::{BackupKind, BackupMetadata, BackupService, SqliteStore};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Configuration for snapshot retention.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub max_count: usize,
    pub max_age_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_count: 20,
            max_age_days: 30,
        }
    }
}

/// Snapshot entry found on disk.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub kind: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    /// Sidecar metadata, when present and readable.
    pub metadata: Option<BackupMetadata>,
}

/// File-based backup service over a `SqliteStore`.
#[derive(Debug, Clone)]
pub struct HistoryBackupService {
    store: Arc<SqliteStore>,
    dir: PathBuf,
    config: HistoryConfig,
}

impl HistoryBackupService {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, dir: impl Into<PathBuf>, config: HistoryConfig) -> Self {
        Self {
            store,
            dir: dir.into(),
            config,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        list_backups(&self.dir)
    }

    fn next_path(&self, kind: BackupKind, label: &str) -> PathBuf {
        let mut at = Utc::now();
        loop {
            let name = format!(
                "{}.{}.{}_{:03}.db",
                kind.as_str(),
                sanitize_label(label),
                at.format(TIMESTAMP_FORMAT),
                at.timestamp_subsec_millis()
            );
            let path = self.dir.join(name);
            if !path.exists() {
                return path;
            }
            at += chrono::Duration::milliseconds(1);
        }
    }
}

impl BackupService for HistoryBackupService {
    fn create_backup(
        &self,
        kind: BackupKind,
        label: &str,
        actor: Option<&str>,
    ) -> Result<BackupMetadata> {
        fs::create_dir_all(&self.dir)?;

        let path = self.next_path(kind, label);
        self.store.snapshot_into(&path)?;

        let size = fs::metadata(&path)?.len();
        let metadata = BackupMetadata {
            kind,
            label: label.to_string(),
            sha256: file_sha256(&path)?,
            path: path.clone(),
            size,
            created_at: Utc::now(),
            actor: actor.map(str::to_string),
        };
        fs::write(sidecar_path(&path), serde_json::to_vec_pretty(&metadata)?)?;
        tracing::info!(path = %path.display(), size, "Created backup");

        if let Err(e) = rotate_history(&self.dir, &self.config) {
            tracing::warn!(error = %e, "Backup rotation failed");
        }

        Ok(metadata)
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "backup".to_string()
    } else {
        cleaned
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let (base, millis) = ts.rsplit_once('_')?;
    if millis.len() != 3 {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    let naive = NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(millis))
}

/// Rotate snapshots based on config limits.
///
/// # Errors
///
/// Returns an error if listing or deleting snapshots fails.
fn rotate_history(dir: &Path, config: &HistoryConfig) -> Result<usize> {
    let backups = list_backups(dir)?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.max_age_days));

    let mut deleted = 0;
    for (idx, entry) in backups.iter().enumerate() {
        if entry.timestamp < cutoff || idx >= config.max_count {
            fs::remove_file(&entry.path)?;
            let sidecar = sidecar_path(&entry.path);
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
            deleted += 1;
        }
    }

    if deleted > 0 {
        tracing::debug!("Pruned {deleted} old backup(s)");
    }
    Ok(deleted)
}

/// List snapshots in `dir`, newest first. Unrecognized files are ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let parts: Vec<&str> = name.split('.').collect();
        let [kind, label, ts, "db"] = parts.as_slice() else {
            continue;
        };
        let Some(timestamp) = parse_timestamp(ts) else {
            continue;
        };
        let Ok(file_meta) = fs::metadata(&path) else {
            continue;
        };

        let metadata = fs::read(sidecar_path(&path))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        backups.push(BackupEntry {
            kind: (*kind).to_string(),
            label: (*label).to_string(),
            timestamp,
            size: file_meta.len(),
            metadata,
            path,
        });
    }

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(backups)
}
