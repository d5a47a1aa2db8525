//! Source adapters.
//!
//! Every supported source tool is read through a `SourceAdapter`, which
//! turns that tool's files into the canonical source records below. The
//! migration pipeline only ever sees these records, so adding a source
//! format means adding an adapter, not another importer.
//!
//! Loading contract:
//! - `load_factions` reads the primary listing. `Err` is structural and
//!   aborts the run.
//! - The other loaders are best-effort. `Err` (missing or unreadable file)
//!   is downgraded to a warning by the caller and treated as empty.
//! - Individual bad records never fail a loader; they come back as
//!   warnings next to the records that did parse.

pub mod directory;
pub mod jsonl;

pub use directory::DirectorySource;
pub use jsonl::JsonlSource;

use crate::error::{MigrationError, Result};
use crate::model::{ChunkCoordinate, Home, PlayerId, ZoneKind};
use crate::util::SourceTimestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Which source tool a migration reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One JSON file per faction under `factions/`.
    Directory,
    /// A single `factions.jsonl` listing.
    Jsonl,
}

impl SourceKind {
    pub const ALL: [Self; 2] = [Self::Directory, Self::Jsonl];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Jsonl => "jsonl",
        }
    }

    /// Build the adapter for this kind.
    #[must_use]
    pub fn adapter(&self) -> Box<dyn SourceAdapter> {
        match self {
            Self::Directory => Box::new(DirectorySource),
            Self::Jsonl => Box::new(JsonlSource),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "directory" | "dir" => Ok(Self::Directory),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(MigrationError::validation(
                "source",
                format!("unknown source kind '{other}' (expected directory or jsonl)"),
            )),
        }
    }
}

/// A member entry as written by the source tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMember {
    #[serde(default, alias = "uuid")]
    pub id: Option<String>,
    #[serde(default, alias = "username")]
    pub name: Option<String>,
    #[serde(default, alias = "rank")]
    pub role: Option<String>,
    #[serde(default)]
    pub joined_at: Option<SourceTimestamp>,
    #[serde(default)]
    pub last_online: Option<SourceTimestamp>,
}

/// A faction as written by the source tool.
///
/// Fields the target store has no equivalent for land in `extra` and are
/// reported as unsupported during validation and conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<SourceTimestamp>,
    /// Player id of the leader, when the tool stores it separately from roles.
    #[serde(default)]
    pub leader: Option<String>,
    #[serde(default)]
    pub members: Vec<SourceMember>,
    #[serde(default)]
    pub home: Option<Home>,
    /// Other faction id -> relation name (`ally`, `enemy`, `neutral`).
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    /// Legacy faction-wide power/currency pool.
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SourceFaction {
    /// Names of source-only fields that will be dropped on conversion.
    #[must_use]
    pub fn unsupported_fields(&self) -> Vec<&str> {
        self.extra.keys().map(String::as_str).collect()
    }

    /// Best label for messages: id, then name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or("<unnamed>")
    }
}

/// One claimed chunk, tagged with its owning faction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceClaimChunk {
    pub faction: String,
    pub world: String,
    pub x: i32,
    pub z: i32,
    #[serde(default)]
    pub claimed_at: Option<SourceTimestamp>,
    #[serde(default)]
    pub claimed_by: Option<String>,
}

impl SourceClaimChunk {
    #[must_use]
    pub fn coordinate(&self) -> ChunkCoordinate {
        ChunkCoordinate::new(self.world.clone(), self.x, self.z)
    }
}

/// One zone chunk. Sources do not group these into zones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceZoneChunk {
    pub world: String,
    pub x: i32,
    pub z: i32,
    pub kind: ZoneKind,
}

impl SourceZoneChunk {
    #[must_use]
    pub fn coordinate(&self) -> ChunkCoordinate {
        ChunkCoordinate::new(self.world.clone(), self.x, self.z)
    }
}

/// Claims grouped by the (raw) owning faction id.
pub type ClaimsByFaction = BTreeMap<String, Vec<SourceClaimChunk>>;

/// Player id -> last known username.
pub type NameCache = HashMap<PlayerId, String>;

/// Records read from one listing plus per-record warnings.
#[derive(Debug, Clone, Default)]
pub struct Loaded<T> {
    pub records: T,
    pub warnings: Vec<String>,
}

impl<T> Loaded<T> {
    #[must_use]
    pub const fn new(records: T, warnings: Vec<String>) -> Self {
        Self { records, warnings }
    }
}

/// Reads one source tool's data directory into canonical source records.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Read the primary faction listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing is missing or unreadable as a whole.
    fn load_factions(&self, dir: &Path) -> Result<Loaded<Vec<SourceFaction>>>;

    /// Read the player name cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    fn load_name_cache(&self, dir: &Path) -> Result<Loaded<NameCache>>;

    /// Read claimed chunks grouped by faction.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    fn load_claims(&self, dir: &Path) -> Result<Loaded<ClaimsByFaction>>;

    /// Read raw zone chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    fn load_zone_chunks(&self, dir: &Path) -> Result<Loaded<Vec<SourceZoneChunk>>>;
}

/// Everything read from one source directory.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub factions: Vec<SourceFaction>,
    pub names: NameCache,
    pub claims: ClaimsByFaction,
    pub zone_chunks: Vec<SourceZoneChunk>,
    /// Per-record problems and degraded listings, in load order.
    pub warnings: Vec<String>,
}

impl SourceBatch {
    /// Read a source directory through `adapter`.
    ///
    /// Only the faction listing is required. A missing or corrupt name
    /// cache, claim listing or zone listing becomes a warning and is treated
    /// as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the faction listing is missing or unreadable.
    pub fn load(adapter: &dyn SourceAdapter, dir: &Path) -> Result<Self> {
        let factions = adapter.load_factions(dir)?;
        let mut batch = Self {
            factions: factions.records,
            warnings: factions.warnings,
            ..Self::default()
        };

        match adapter.load_name_cache(dir) {
            Ok(loaded) => {
                batch.names = loaded.records;
                batch.warnings.extend(loaded.warnings);
            }
            Err(e) => batch.degrade("name cache", &e),
        }
        match adapter.load_claims(dir) {
            Ok(loaded) => {
                batch.claims = loaded.records;
                batch.warnings.extend(loaded.warnings);
            }
            Err(e) => batch.degrade("claims", &e),
        }
        match adapter.load_zone_chunks(dir) {
            Ok(loaded) => {
                batch.zone_chunks = loaded.records;
                batch.warnings.extend(loaded.warnings);
            }
            Err(e) => batch.degrade("zones", &e),
        }

        tracing::debug!(
            kind = %adapter.kind(),
            factions = batch.factions.len(),
            claim_owners = batch.claims.len(),
            claims = batch.claim_count(),
            zone_chunks = batch.zone_chunks.len(),
            "Loaded source batch"
        );
        Ok(batch)
    }

    fn degrade(&mut self, listing: &str, error: &MigrationError) {
        tracing::warn!(listing, error = %error, "Optional source listing unavailable");
        self.warnings
            .push(format!("{listing} unavailable, treated as empty: {error}"));
    }

    /// Total number of claimed chunks across all owners.
    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.claims.values().map(Vec::len).sum()
    }
}

pub(crate) fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MigrationError::SourceMissing {
            path: path.to_path_buf(),
        })
    }
}

/// Parse a whole JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    require_file(path)?;
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| MigrationError::SourceParse {
        file: path.display().to_string(),
        line: e.line(),
        reason: e.to_string(),
    })
}

/// Parse a JSONL file; bad lines become warnings, blank lines are skipped.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Loaded<Vec<T>>> {
    require_file(path)?;
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warnings.push(format!("{name} line {}: {e}", line_num + 1)),
        }
    }
    Ok(Loaded::new(records, warnings))
}

/// Parse `{ "<uuid>": "<name>" }`, skipping keys that are not player ids.
pub(crate) fn read_name_cache(path: &Path) -> Result<Loaded<NameCache>> {
    let raw: BTreeMap<String, String> = read_json(path)?;
    let mut names = NameCache::with_capacity(raw.len());
    let mut warnings = Vec::new();
    for (key, value) in raw {
        match key.parse::<PlayerId>() {
            Ok(id) => {
                names.insert(id, value);
            }
            Err(_) => warnings.push(format!("name cache: invalid player id '{key}'")),
        }
    }
    Ok(Loaded::new(names, warnings))
}

pub(crate) fn group_claims(claims: Vec<SourceClaimChunk>) -> ClaimsByFaction {
    let mut grouped = ClaimsByFaction::new();
    for claim in claims {
        grouped.entry(claim.faction.clone()).or_default().push(claim);
    }
    grouped
}
