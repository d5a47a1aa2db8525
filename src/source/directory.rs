//! Adapter for tools that keep one JSON file per faction.
//!
//! Layout:
//! ```text
//! <dir>/factions/<anything>.json   one SourceFaction per file (required)
//! <dir>/names.json                 { "<player uuid>": "<name>" }
//! <dir>/claims.json                [ { faction, world, x, z, claimed_at, claimed_by } ]
//! <dir>/zones.json                 { "safe": [ {world,x,z} ], "war": [ ... ] }
//! ```

use super::{
    ClaimsByFaction, Loaded, NameCache, SourceAdapter, SourceClaimChunk, SourceFaction,
    SourceKind, SourceZoneChunk, group_claims, read_json, read_name_cache,
};
use crate::error::{MigrationError, Result};
use crate::model::ZoneKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const FACTIONS_DIR: &str = "factions";
pub const NAMES_FILE: &str = "names.json";
pub const CLAIMS_FILE: &str = "claims.json";
pub const ZONES_FILE: &str = "zones.json";

#[derive(Debug, Deserialize)]
struct ZoneChunkEntry {
    world: String,
    x: i32,
    z: i32,
}

/// Per-faction-file source.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySource;

impl DirectorySource {
    fn faction_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let factions_dir = dir.join(FACTIONS_DIR);
        if !factions_dir.is_dir() {
            return Err(MigrationError::SourceMissing { path: factions_dir });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&factions_dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == "json")
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl SourceAdapter for DirectorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Directory
    }

    fn load_factions(&self, dir: &Path) -> Result<Loaded<Vec<SourceFaction>>> {
        let files = Self::faction_files(dir)?;
        let mut factions = Vec::with_capacity(files.len());
        let mut warnings = Vec::new();

        for path in files {
            match read_json::<SourceFaction>(&path) {
                Ok(faction) => factions.push(faction),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Unreadable faction file");
                    warnings.push(format!(
                        "{}: {e}",
                        path.file_name().unwrap_or_default().to_string_lossy()
                    ));
                }
            }
        }

        Ok(Loaded::new(factions, warnings))
    }

    fn load_name_cache(&self, dir: &Path) -> Result<Loaded<NameCache>> {
        read_name_cache(&dir.join(NAMES_FILE))
    }

    fn load_claims(&self, dir: &Path) -> Result<Loaded<ClaimsByFaction>> {
        let claims: Vec<SourceClaimChunk> = read_json(&dir.join(CLAIMS_FILE))?;
        Ok(Loaded::new(group_claims(claims), Vec::new()))
    }

    fn load_zone_chunks(&self, dir: &Path) -> Result<Loaded<Vec<SourceZoneChunk>>> {
        let raw: BTreeMap<String, Vec<ZoneChunkEntry>> = read_json(&dir.join(ZONES_FILE))?;
        let mut chunks = Vec::new();
        let mut warnings = Vec::new();

        for (kind_name, entries) in raw {
            let Ok(kind) = kind_name.parse::<ZoneKind>() else {
                warnings.push(format!(
                    "zones.json: unknown zone kind '{kind_name}' ({} chunks ignored)",
                    entries.len()
                ));
                continue;
            };
            chunks.extend(entries.into_iter().map(|e| SourceZoneChunk {
                world: e.world,
                x: e.x,
                z: e.z,
                kind,
            }));
        }

        Ok(Loaded::new(chunks, warnings))
    }
}
