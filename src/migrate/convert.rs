//! Source record to canonical faction conversion.

use crate::model::{ChunkCoordinate, Faction, FactionId, LogKind, Member, PlayerId, Relation, Role};
use crate::reconcile::{Reconciliation, Roster, elect_successor};
use crate::source::{ClaimsByFaction, NameCache, SourceFaction, SourceKind, SourceMember};
use crate::storage::FactionStore;
use crate::util::time::resolve_or;
use crate::util::{generate_unique_tag, is_valid_tag};
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, HashSet};

/// Display colors handed out when a source color is missing or black.
/// Neither black nor white is in the list.
pub const COLOR_PALETTE: &[&str] = &[
    "#AA0000", "#00AA00", "#0000AA", "#AA00AA", "#00AAAA", "#FFAA00", "#FF5555", "#55FF55",
    "#5555FF", "#FF55FF", "#55FFFF", "#FFFF55",
];

const BLACK: &[&str] = &["#000000", "#000", "000000", "black", "&0", "\u{a7}0"];

/// Username used when neither the record nor the name cache has one.
pub const UNKNOWN_USERNAME: &str = "unknown";

/// Map a source role name onto the three target roles.
#[must_use]
pub fn map_role(raw: Option<&str>) -> Role {
    match raw.map(|r| r.trim().to_lowercase()).as_deref() {
        Some("leader" | "owner") => Role::Leader,
        Some("officer" | "moderator" | "coleader" | "co-leader" | "admin") => Role::Officer,
        _ => Role::Member,
    }
}

fn is_black(color: &str) -> bool {
    BLACK.iter().any(|b| b.eq_ignore_ascii_case(color.trim()))
}

fn random_color() -> String {
    COLOR_PALETTE
        .choose(&mut rand::rng())
        .map_or("#55FFFF", |c| *c)
        .to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Why a source faction was not converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub reason: String,
    /// Whether the skip deserves a report warning (existing-id skips do not).
    pub warn: bool,
}

impl Skip {
    fn warn(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            warn: true,
        }
    }

    fn quiet(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            warn: false,
        }
    }
}

/// A converted faction ready for reconciliation and commit.
#[derive(Debug, Clone)]
pub struct Converted {
    pub faction: Faction,
    /// Legacy faction-wide power pool, when the source had one.
    pub legacy_power: Option<f64>,
    /// Claims held by another target faction, with that owner.
    pub contested: Vec<(ChunkCoordinate, FactionId)>,
    pub warnings: Vec<String>,
    label: String,
}

impl Converted {
    /// Fold a reconciliation plan back into the faction. Claims held by a
    /// faction the plan disbands become free, and relations to such a
    /// faction are dropped unless the batch brings that id back.
    ///
    /// Returns how many claims stay dropped.
    pub fn settle(&mut self, plan: &Reconciliation, batch_ids: &HashSet<FactionId>) -> usize {
        let disbanded: HashSet<FactionId> = plan.disbanded.iter().copied().collect();

        let contested = std::mem::take(&mut self.contested);
        for (chunk, owner) in contested {
            if disbanded.contains(&owner) {
                self.faction.claims.insert(chunk);
            } else {
                self.contested.push((chunk, owner));
            }
        }
        self.faction
            .relations
            .retain(|other, _| !disbanded.contains(other) || batch_ids.contains(other));

        let dropped = self.contested.len();
        if dropped > 0 {
            self.warnings.push(format!(
                "faction {}: {dropped} claim(s) already owned by another faction were dropped",
                self.label
            ));
        }
        dropped
    }
}

/// Read-only inputs shared by every conversion in one run.
pub struct Converter<'a> {
    pub kind: SourceKind,
    pub roster: &'a Roster,
    pub store: &'a dyn FactionStore,
    pub names: &'a NameCache,
    pub claims: &'a ClaimsByFaction,
    /// Every parseable faction id in the source listing.
    pub batch_ids: &'a HashSet<FactionId>,
    pub overwrite: bool,
    pub actor: Option<PlayerId>,
}

impl Converter<'_> {
    /// Convert one source faction. `seen` collects ids already handled in
    /// this batch so duplicates are skipped.
    ///
    /// # Errors
    ///
    /// Returns a `Skip` when the record must not be imported.
    pub fn convert(
        &self,
        source: &SourceFaction,
        seen: &mut HashSet<FactionId>,
    ) -> Result<Converted, Skip> {
        let label = source.label().to_string();
        let Some(raw_id) = non_empty(source.id.as_deref()) else {
            return Err(Skip::warn(format!("faction {label}: missing id, skipped")));
        };
        let Some(name) = non_empty(source.name.as_deref()) else {
            return Err(Skip::warn(format!("faction {label}: missing name, skipped")));
        };
        let Ok(id) = raw_id.parse::<FactionId>() else {
            return Err(Skip::warn(format!(
                "faction {label}: invalid id '{raw_id}', skipped"
            )));
        };
        if !seen.insert(id) {
            return Err(Skip::warn(format!(
                "faction {label}: duplicate id in source, skipped"
            )));
        }
        if self.roster.contains(&id) && !self.overwrite {
            return Err(Skip::quiet(format!("faction {label}: already exists")));
        }

        let mut warnings = Vec::new();
        let name = match self.roster.by_name(name).filter(|owner| *owner != id) {
            None => name.to_string(),
            Some(owner) if !self.overwrite => {
                return Err(Skip::warn(format!(
                    "faction {label}: name '{name}' is used by faction {owner}, skipped"
                )));
            }
            Some(_) => {
                let renamed = self.unique_name(name, id);
                warnings.push(format!(
                    "faction {label}: name '{name}' is taken, imported as '{renamed}'"
                ));
                renamed
            }
        };

        let (created_at, bad_time) = resolve_or(source.created_at.as_ref(), "created_at", Utc::now());
        if let Some(problem) = bad_time {
            warnings.push(format!("faction {label}: {problem}"));
        }

        let mut faction = Faction::new(id, name, String::new());
        faction.created_at = created_at;
        faction.description = source.description.clone();
        faction.home = source.home.clone();
        faction.permissions = source.permissions.clone();

        self.convert_members(source, &label, created_at, &mut faction, &mut warnings);
        if faction.is_empty() {
            return Err(Skip::warn(format!(
                "faction {label}: no valid members, skipped"
            )));
        }
        self.enforce_single_leader(source, &label, &mut faction, &mut warnings);

        faction.tag = self.pick_tag(source, &label, &faction, &mut warnings);
        faction.color = match non_empty(source.color.as_deref()) {
            Some(color) if !is_black(color) => color.to_string(),
            _ => random_color(),
        };

        let contested = self.convert_claims(raw_id, &mut faction);
        self.convert_relations(source, &label, &mut faction, &mut warnings);

        let unsupported = source.unsupported_fields();
        if !unsupported.is_empty() {
            warnings.push(format!(
                "faction {label}: dropped unsupported field(s): {}",
                unsupported.join(", ")
            ));
        }

        faction.log(
            LogKind::Imported,
            format!("Imported from {} source", self.kind),
            self.actor,
        );

        Ok(Converted {
            faction,
            legacy_power: source.power,
            contested,
            warnings,
            label,
        })
    }

    fn unique_name(&self, base: &str, id: FactionId) -> String {
        (2u32..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| self.roster.by_name(candidate).is_none_or(|owner| owner == id))
            .unwrap_or_else(|| format!("{base}-{id}"))
    }

    fn convert_members(
        &self,
        source: &SourceFaction,
        label: &str,
        created_at: DateTime<Utc>,
        faction: &mut Faction,
        warnings: &mut Vec<String>,
    ) {
        let mut invalid = Vec::new();
        for entry in &source.members {
            let Some(player_id) =
                non_empty(entry.id.as_deref()).and_then(|raw| raw.parse::<PlayerId>().ok())
            else {
                invalid.push(entry.id.clone().unwrap_or_else(|| "<missing>".to_string()));
                continue;
            };
            if faction.members.contains_key(&player_id) {
                continue;
            }
            let member = self.convert_member(entry, player_id, label, created_at, warnings);
            faction.members.insert(player_id, member);
        }
        if !invalid.is_empty() {
            warnings.push(format!(
                "faction {label}: omitted member(s) with invalid id: {}",
                invalid.join(", ")
            ));
        }
    }

    fn convert_member(
        &self,
        entry: &SourceMember,
        player_id: PlayerId,
        label: &str,
        created_at: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Member {
        let username = non_empty(entry.name.as_deref())
            .map(str::to_string)
            .or_else(|| self.names.get(&player_id).cloned())
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string());

        let (joined_at, bad_joined) = resolve_or(entry.joined_at.as_ref(), "joined_at", created_at);
        let (last_online, bad_online) =
            resolve_or(entry.last_online.as_ref(), "last_online", joined_at);
        for problem in [bad_joined, bad_online].into_iter().flatten() {
            warnings.push(format!("faction {label}: member {player_id}: {problem}"));
        }

        Member {
            player_id,
            username,
            role: map_role(entry.role.as_deref()),
            joined_at,
            last_online,
        }
    }

    /// The source `leader` field wins; otherwise the most senior member by
    /// succession order leads. Every other leader becomes an officer.
    fn enforce_single_leader(
        &self,
        source: &SourceFaction,
        label: &str,
        faction: &mut Faction,
        warnings: &mut Vec<String>,
    ) {
        let designated = non_empty(source.leader.as_deref()).and_then(|raw| {
            let player = raw.parse::<PlayerId>().ok().filter(|p| faction.members.contains_key(p));
            if player.is_none() {
                warnings.push(format!(
                    "faction {label}: leader '{raw}' is not a valid member, electing one"
                ));
            }
            player
        });
        let Some(leader) = designated.or_else(|| elect_successor(faction)) else {
            return;
        };

        let mut demoted = 0;
        for member in faction.members.values_mut() {
            if member.player_id == leader {
                member.role = Role::Leader;
            } else if member.role == Role::Leader {
                member.role = Role::Officer;
                demoted += 1;
            }
        }
        if demoted > 0 {
            warnings.push(format!(
                "faction {label}: {demoted} extra leader(s) demoted to officer"
            ));
        }
    }

    fn pick_tag(
        &self,
        source: &SourceFaction,
        label: &str,
        faction: &Faction,
        warnings: &mut Vec<String>,
    ) -> String {
        let requested = non_empty(source.tag.as_deref());
        if let Some(tag) = requested {
            let owner = self.roster.by_tag(tag);
            if is_valid_tag(tag) && owner.is_none_or(|o| o == faction.id) {
                return tag.to_string();
            }
        }

        let reserved = self.roster.tag_keys();
        let tag = self
            .store
            .generate_unique_tag(&faction.name, &reserved)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Store tag lookup failed, using roster only");
                generate_unique_tag(&faction.name, |t| reserved.contains(&t.to_lowercase()))
            });
        if let Some(requested) = requested {
            warnings.push(format!(
                "faction {label}: tag '{requested}' unusable, generated '{tag}'"
            ));
        }
        tag
    }

    fn convert_claims(
        &self,
        raw_id: &str,
        faction: &mut Faction,
    ) -> Vec<(ChunkCoordinate, FactionId)> {
        let Some(chunks) = self.claims.get(raw_id) else {
            return Vec::new();
        };
        let mut contested = Vec::new();
        for claim in chunks {
            let chunk = claim.coordinate();
            match self.roster.claim_owner(&chunk) {
                Some(owner) if owner != faction.id => contested.push((chunk, owner)),
                _ => {
                    faction.claims.insert(chunk);
                }
            }
        }
        contested
    }

    fn convert_relations(
        &self,
        source: &SourceFaction,
        label: &str,
        faction: &mut Faction,
        warnings: &mut Vec<String>,
    ) {
        let mut relations = BTreeMap::new();
        for (raw_other, raw_relation) in &source.relations {
            if raw_relation.trim().eq_ignore_ascii_case("neutral") {
                continue;
            }
            let Ok(relation) = raw_relation.parse::<Relation>() else {
                warnings.push(format!(
                    "faction {label}: unsupported relation '{raw_relation}' dropped"
                ));
                continue;
            };
            let Ok(other) = raw_other.parse::<FactionId>() else {
                continue;
            };
            if other == faction.id {
                continue;
            }
            if self.batch_ids.contains(&other) || self.roster.contains(&other) {
                relations.insert(other, relation);
            } else {
                tracing::debug!(faction = %label, other = %other, "Relation to unknown faction dropped");
            }
        }
        faction.relations = relations;
    }
}
