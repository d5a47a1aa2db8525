//! Adapter for tools that export line-delimited JSON.
//!
//! Layout:
//! ```text
//! <dir>/factions.jsonl   one SourceFaction per line (required)
//! <dir>/names.json       { "<player uuid>": "<name>" }
//! <dir>/claims.jsonl     one { faction, world, x, z, ... } per line
//! <dir>/zones.jsonl      one { world, x, z, kind } per line
//! ```

use super::{
    ClaimsByFaction, Loaded, NameCache, SourceAdapter, SourceClaimChunk, SourceFaction,
    SourceKind, SourceZoneChunk, group_claims, read_jsonl, read_name_cache,
};
use crate::error::Result;
use std::path::Path;

pub const FACTIONS_FILE: &str = "factions.jsonl";
pub const NAMES_FILE: &str = "names.json";
pub const CLAIMS_FILE: &str = "claims.jsonl";
pub const ZONES_FILE: &str = "zones.jsonl";

/// Line-delimited JSON source.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlSource;

impl SourceAdapter for JsonlSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Jsonl
    }

    fn load_factions(&self, dir: &Path) -> Result<Loaded<Vec<SourceFaction>>> {
        read_jsonl(&dir.join(FACTIONS_FILE))
    }

    fn load_name_cache(&self, dir: &Path) -> Result<Loaded<NameCache>> {
        read_name_cache(&dir.join(NAMES_FILE))
    }

    fn load_claims(&self, dir: &Path) -> Result<Loaded<ClaimsByFaction>> {
        let loaded: Loaded<Vec<SourceClaimChunk>> = read_jsonl(&dir.join(CLAIMS_FILE))?;
        Ok(Loaded::new(group_claims(loaded.records), loaded.warnings))
    }

    fn load_zone_chunks(&self, dir: &Path) -> Result<Loaded<Vec<SourceZoneChunk>>> {
        read_jsonl(&dir.join(ZONES_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_listing_is_structural() {
        let temp = TempDir::new().unwrap();
        let err = JsonlSource.load_factions(temp.path()).unwrap_err();
        assert!(matches!(err, MigrationError::SourceMissing { .. }));
    }

    #[test]
    fn test_bad_line_is_per_record_warning() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(FACTIONS_FILE),
            "{\"id\":\"a\",\"name\":\"Alpha\"}\n{broken\n{\"id\":\"b\",\"name\":\"Beta\"}\n",
        )
        .unwrap();

        let loaded = JsonlSource.load_factions(temp.path()).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_claims_grouped() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CLAIMS_FILE),
            "{\"faction\":\"a\",\"world\":\"w\",\"x\":0,\"z\":0,\"claimed_at\":1735689600000}\n",
        )
        .unwrap();
        let loaded = JsonlSource.load_claims(temp.path()).unwrap();
        assert_eq!(loaded.records["a"].len(), 1);
    }
}
