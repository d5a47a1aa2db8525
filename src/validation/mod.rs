//! Pre-flight conflict validation.
//!
//! `ConflictValidator` compares a parsed source batch with a snapshot of the
//! target store and reports what a migration would run into. It never
//! mutates either side and never decides skip/overwrite; the pipeline makes
//! those calls from the same facts.

use crate::error::Result;
use crate::model::{FactionId, PlayerId};
use crate::reconcile::Roster;
use crate::report::{ConflictKind, ValidationReport, ValidationTally};
use crate::source::{SourceAdapter, SourceBatch, SourceKind};
use crate::storage::FactionStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

/// True when `world` is accepted. An empty allow-list accepts every world.
#[must_use]
pub fn is_known_world(known_worlds: &[String], world: &str) -> bool {
    known_worlds.is_empty() || known_worlds.iter().any(|w| w.eq_ignore_ascii_case(world))
}

/// Read-only comparison of a source batch against the target.
#[derive(Debug, Clone, Copy)]
pub struct ConflictValidator<'a> {
    roster: &'a Roster,
    known_worlds: &'a [String],
}

impl<'a> ConflictValidator<'a> {
    #[must_use]
    pub const fn new(roster: &'a Roster, known_worlds: &'a [String]) -> Self {
        Self {
            roster,
            known_worlds,
        }
    }

    /// Load `dir` through `adapter` and validate it against `store`.
    ///
    /// A missing or unreadable faction listing (or an unreadable store)
    /// yields an invalid report rather than an error.
    #[must_use]
    pub fn validate_source(
        adapter: &dyn SourceAdapter,
        dir: &Path,
        store: &dyn FactionStore,
        known_worlds: &[String],
    ) -> ValidationReport {
        let kind = adapter.kind();
        let loaded: Result<(Roster, SourceBatch)> = Roster::load(store)
            .and_then(|roster| Ok((roster, SourceBatch::load(adapter, dir)?)));

        match loaded {
            Ok((roster, batch)) => ConflictValidator::new(&roster, known_worlds).validate(kind, &batch),
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Validation could not read its inputs");
                let mut tally = ValidationTally::new(kind);
                tally.listing_readable = false;
                tally.error(e.to_string());
                tally.finish()
            }
        }
    }

    /// Validate an already-loaded batch.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn validate(&self, kind: SourceKind, batch: &SourceBatch) -> ValidationReport {
        let mut tally = ValidationTally::new(kind);
        tally.warnings.extend(batch.warnings.iter().cloned());

        let mut batch_ids: HashMap<FactionId, String> = HashMap::new();
        let mut batch_names: HashMap<String, String> = HashMap::new();
        let mut batch_players: HashMap<PlayerId, String> = HashMap::new();

        for source in &batch.factions {
            let label = source.label().to_string();

            let raw_id = source.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let name = source.name.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let (Some(raw_id), Some(name)) = (raw_id, name) else {
                let missing = if raw_id.is_none() { "id" } else { "name" };
                tally.error(format!("faction {label}: missing {missing}, record dropped"));
                continue;
            };
            let Ok(id) = raw_id.parse::<FactionId>() else {
                tally.invalid_ids.push(raw_id.to_string());
                continue;
            };

            tally.total_factions += 1;

            if let Some(first) = batch_ids.get(&id) {
                tally.conflict(
                    ConflictKind::Id,
                    &label,
                    first,
                    false,
                    None,
                    format!("id {id} appears more than once in the source"),
                );
            } else {
                batch_ids.insert(id, label.clone());
            }

            let name_key = name.to_lowercase();
            if let Some(first) = batch_names.get(&name_key) {
                tally.conflict(
                    ConflictKind::Name,
                    &label,
                    first,
                    false,
                    None,
                    format!("name '{name}' appears more than once in the source"),
                );
            } else {
                batch_names.insert(name_key, label.clone());
            }

            if self.roster.contains(&id) {
                tally.conflict(
                    ConflictKind::Id,
                    &label,
                    id.to_string(),
                    true,
                    None,
                    "faction already exists in the target; skipped unless overwriting",
                );
            }
            if let Some(owner) = self.roster.by_name(name).filter(|owner| *owner != id) {
                tally.conflict(
                    ConflictKind::Name,
                    &label,
                    owner.to_string(),
                    true,
                    None,
                    format!("name '{name}' is used by another faction in the target"),
                );
            }

            let mut seen_here: HashSet<PlayerId> = HashSet::new();
            for member in &source.members {
                let Some(raw_member) = member.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
                else {
                    tally.warn(format!("faction {label}: member without id will be omitted"));
                    continue;
                };
                let Ok(player) = raw_member.parse::<PlayerId>() else {
                    tally.invalid_ids.push(raw_member.to_string());
                    continue;
                };
                if !seen_here.insert(player) {
                    continue;
                }
                tally.total_members += 1;

                if let Some(first) = batch_players.get(&player) {
                    tally.conflict(
                        ConflictKind::Member,
                        &label,
                        first,
                        false,
                        Some(player.to_string()),
                        format!("player {player} is listed by more than one source faction"),
                    );
                } else {
                    batch_players.insert(player, label.clone());
                }

                if let Some(owner) = self.roster.faction_of(&player).filter(|owner| *owner != id) {
                    let owner_name = self
                        .roster
                        .get(&owner)
                        .map_or_else(|| owner.to_string(), |f| f.name.clone());
                    tally.conflict(
                        ConflictKind::Member,
                        &label,
                        owner.to_string(),
                        true,
                        Some(player.to_string()),
                        format!("player {player} will be moved out of {owner_name}"),
                    );
                }
            }

            let unsupported = source.unsupported_fields();
            if !unsupported.is_empty() {
                tally.warn(format!(
                    "faction {label}: unsupported field(s) will be dropped: {}",
                    unsupported.join(", ")
                ));
            }
        }

        self.check_claims(batch, &batch_ids, &mut tally);
        self.check_zones(batch, &mut tally);

        let report = tally.finish();
        tracing::info!(
            kind = %kind,
            valid = report.valid,
            factions = report.total_factions,
            conflicts = report.conflicts.len(),
            "Validation finished"
        );
        report
    }

    fn check_claims(
        &self,
        batch: &SourceBatch,
        batch_ids: &HashMap<FactionId, String>,
        tally: &mut ValidationTally,
    ) {
        tally.total_claims = batch.claim_count();
        let mut unknown_worlds: BTreeMap<String, usize> = BTreeMap::new();
        for (owner, chunks) in &batch.claims {
            let known_owner = owner
                .trim()
                .parse::<FactionId>()
                .is_ok_and(|id| batch_ids.contains_key(&id));
            if !known_owner {
                tally.warn(format!(
                    "{} claim(s) belong to faction '{owner}', which is not in the source",
                    chunks.len()
                ));
            }
            for chunk in chunks {
                if !is_known_world(self.known_worlds, &chunk.world) {
                    *unknown_worlds.entry(chunk.world.clone()).or_default() += 1;
                }
            }
        }
        for (world, count) in unknown_worlds {
            tally.warn(format!("{count} claim(s) reference unknown world '{world}'"));
        }
    }

    fn check_zones(&self, batch: &SourceBatch, tally: &mut ValidationTally) {
        tally.total_zone_chunks = batch.zone_chunks.len();
        let unknown: BTreeSet<&str> = batch
            .zone_chunks
            .iter()
            .filter(|c| !is_known_world(self.known_worlds, &c.world))
            .map(|c| c.world.as_str())
            .collect();
        for world in unknown {
            tally.warn(format!("zone chunks reference unknown world '{world}'"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Faction, Member, Role};
    use crate::source::{SourceClaimChunk, SourceFaction, SourceMember, SourceZoneChunk};
    use crate::model::ZoneKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn uuid(n: u128) -> String {
        Uuid::from_u128(n).to_string()
    }

    fn source(id: Option<u128>, name: &str, members: &[u128]) -> SourceFaction {
        SourceFaction {
            id: id.map(uuid),
            name: Some(name.to_string()),
            members: members
                .iter()
                .map(|m| SourceMember {
                    id: Some(uuid(*m)),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn existing(id: u128, name: &str, members: &[u128]) -> Faction {
        let mut f = Faction::new(FactionId(Uuid::from_u128(id)), name, &name[..3]);
        for m in members {
            let player_id = PlayerId(Uuid::from_u128(*m));
            f.members.insert(
                player_id,
                Member {
                    player_id,
                    username: format!("p{m}"),
                    role: Role::Leader,
                    joined_at: Utc::now(),
                    last_online: Utc::now(),
                },
            );
        }
        f
    }

    fn batch(factions: Vec<SourceFaction>) -> SourceBatch {
        SourceBatch {
            factions,
            ..SourceBatch::default()
        }
    }

    #[test]
    fn test_missing_id_is_dropped_not_counted() {
        let roster = Roster::default();
        let report = ConflictValidator::new(&roster, &[]).validate(
            SourceKind::Jsonl,
            &batch(vec![source(None, "Nameless", &[]), source(Some(1), "Alpha", &[])]),
        );
        assert!(report.valid);
        assert_eq!(report.total_factions, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_invalid_ids_reported() {
        let roster = Roster::default();
        let mut bad = source(Some(1), "Alpha", &[]);
        bad.id = Some("not-a-uuid".to_string());
        let mut bad_member = source(Some(2), "Beta", &[]);
        bad_member.members.push(SourceMember {
            id: Some("steve".to_string()),
            ..Default::default()
        });

        let report = ConflictValidator::new(&roster, &[])
            .validate(SourceKind::Jsonl, &batch(vec![bad, bad_member]));
        assert_eq!(report.invalid_ids, vec!["not-a-uuid", "steve"]);
        assert_eq!(report.total_factions, 1);
    }

    #[test]
    fn test_batch_duplicates_are_conflicts() {
        let roster = Roster::default();
        let report = ConflictValidator::new(&roster, &[]).validate(
            SourceKind::Directory,
            &batch(vec![
                source(Some(1), "Alpha", &[10]),
                source(Some(1), "ALPHA", &[10]),
            ]),
        );
        assert!(report.valid);
        assert_eq!(report.conflicts_of(ConflictKind::Id).len(), 1);
        assert_eq!(report.conflicts_of(ConflictKind::Name).len(), 1);
        assert_eq!(report.conflicts_of(ConflictKind::Member).len(), 1);
    }

    #[test]
    fn test_existing_conflicts_and_moves() {
        let roster = Roster::from_factions(vec![
            existing(1, "Alpha", &[10]),
            existing(5, "Bravo", &[20]),
        ]);
        let report = ConflictValidator::new(&roster, &[]).validate(
            SourceKind::Jsonl,
            &batch(vec![source(Some(1), "Alpha", &[10]), source(Some(2), "bravo", &[20])]),
        );

        let ids = report.conflicts_of(ConflictKind::Id);
        assert_eq!(ids.len(), 1);
        assert!(ids[0].existing);
        let names = report.conflicts_of(ConflictKind::Name);
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].faction, uuid(2));
        // p10 stays in its own faction; p20 moves out of Bravo
        let members = report.conflicts_of(ConflictKind::Member);
        assert_eq!(members.len(), 1);
        assert!(members[0].detail.contains("Bravo"));
    }

    #[test]
    fn test_unsupported_fields_warn() {
        let roster = Roster::default();
        let mut faction = source(Some(1), "Alpha", &[]);
        faction
            .extra
            .insert("points".to_string(), serde_json::json!(300));
        let report =
            ConflictValidator::new(&roster, &[]).validate(SourceKind::Jsonl, &batch(vec![faction]));
        assert!(report.warnings.iter().any(|w| w.contains("points")));
    }

    #[test]
    fn test_claims_and_zones_warn_on_unknowns() {
        let roster = Roster::default();
        let mut b = batch(vec![source(Some(1), "Alpha", &[])]);
        b.claims.insert(
            "orphan".to_string(),
            vec![SourceClaimChunk {
                faction: "orphan".to_string(),
                world: "world".to_string(),
                x: 0,
                z: 0,
                claimed_at: None,
                claimed_by: None,
            }],
        );
        b.zone_chunks.push(SourceZoneChunk {
            world: "the_end".to_string(),
            x: 0,
            z: 0,
            kind: ZoneKind::War,
        });
        let worlds = vec!["world".to_string()];

        let report = ConflictValidator::new(&roster, &worlds).validate(SourceKind::Jsonl, &b);
        assert!(report.valid);
        assert_eq!(report.total_claims, 1);
        assert_eq!(report.total_zone_chunks, 1);
        assert!(report.warnings.iter().any(|w| w.contains("orphan")));
        assert!(report.warnings.iter().any(|w| w.contains("the_end")));
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let roster = Roster::default();
        let report = ConflictValidator::new(&roster, &[]).validate(SourceKind::Jsonl, &batch(vec![]));
        assert!(!report.valid);
    }

    #[test]
    fn test_known_world_matching() {
        let worlds = vec!["World".to_string()];
        assert!(is_known_world(&worlds, "world"));
        assert!(!is_known_world(&worlds, "nether"));
        assert!(is_known_world(&[], "anything"));
    }
}
