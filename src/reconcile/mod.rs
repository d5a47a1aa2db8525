//! Cross-faction membership reconciliation.
//!
//! The target store allows a player in at most one faction. Importing a
//! faction whose members already sit in other factions would break that, so
//! before each commit the reconciler works out which existing factions lose
//! which players, who succeeds a departing leader, and which factions end up
//! empty and must be disbanded.
//!
//! Planning and applying are separate. `MembershipReconciler::reconcile`
//! reads a `Roster` and returns a `Reconciliation`; the caller then applies
//! it to the roster (always) and to the store (only on a real run). That is
//! what lets a dry run report the same numbers as a real one.

use crate::error::Result;
use crate::model::{ChunkCoordinate, Faction, FactionId, LogKind, Member, PlayerId, Role};
use crate::storage::FactionStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Reason recorded on factions emptied by an import.
pub const DISBAND_REASON: &str = "all members imported elsewhere";

/// In-memory view of the target store's factions with lookup indexes.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    factions: HashMap<FactionId, Faction>,
    players: HashMap<PlayerId, FactionId>,
    names: HashMap<String, FactionId>,
    tags: HashMap<String, FactionId>,
    claims: HashMap<ChunkCoordinate, FactionId>,
}

impl Roster {
    #[must_use]
    pub fn from_factions(factions: impl IntoIterator<Item = Faction>) -> Self {
        let mut roster = Self::default();
        for faction in factions {
            roster.upsert(faction);
        }
        roster
    }

    /// Snapshot the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(store: &dyn FactionStore) -> Result<Self> {
        Ok(Self::from_factions(store.all_factions()?))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factions.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &FactionId) -> Option<&Faction> {
        self.factions.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &FactionId) -> bool {
        self.factions.contains_key(id)
    }

    pub fn factions(&self) -> impl Iterator<Item = &Faction> {
        self.factions.values()
    }

    /// Case-insensitive name lookup.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<FactionId> {
        self.names.get(&name.to_lowercase()).copied()
    }

    /// Case-insensitive tag lookup.
    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Option<FactionId> {
        self.tags.get(&tag.to_lowercase()).copied()
    }

    /// Lowercase tags currently in use.
    #[must_use]
    pub fn tag_keys(&self) -> HashSet<String> {
        self.tags.keys().cloned().collect()
    }

    #[must_use]
    pub fn faction_of(&self, player: &PlayerId) -> Option<FactionId> {
        self.players.get(player).copied()
    }

    #[must_use]
    pub fn claim_owner(&self, chunk: &ChunkCoordinate) -> Option<FactionId> {
        self.claims.get(chunk).copied()
    }

    /// Insert or replace a faction and reindex it.
    pub fn upsert(&mut self, faction: Faction) {
        self.remove(&faction.id);
        let id = faction.id;
        self.names.insert(faction.name_key(), id);
        self.tags.insert(faction.tag.to_lowercase(), id);
        for player in faction.members.keys() {
            self.players.insert(*player, id);
        }
        for chunk in &faction.claims {
            self.claims.insert(chunk.clone(), id);
        }
        self.factions.insert(id, faction);
    }

    /// Remove a faction and every index entry pointing at it.
    pub fn remove(&mut self, id: &FactionId) -> Option<Faction> {
        let faction = self.factions.remove(id)?;
        self.names.retain(|_, owner| owner != id);
        self.tags.retain(|_, owner| owner != id);
        for player in faction.members.keys() {
            if self.players.get(player) == Some(id) {
                self.players.remove(player);
            }
        }
        for chunk in &faction.claims {
            if self.claims.get(chunk) == Some(id) {
                self.claims.remove(chunk);
            }
        }
        for other in self.factions.values_mut() {
            other.relations.remove(id);
        }
        Some(faction)
    }

    /// Apply a planned reconciliation to this roster.
    pub fn apply(&mut self, plan: &Reconciliation) {
        for faction in &plan.updated {
            self.upsert(faction.clone());
        }
        for id in &plan.disbanded {
            self.remove(id);
        }
    }
}

/// A player taken out of an existing faction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedPlayer {
    pub player: PlayerId,
    pub from: FactionId,
    pub previous_role: Role,
}

/// A leader replaced after the old one moved away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succession {
    pub faction: FactionId,
    pub previous: PlayerId,
    pub successor: PlayerId,
}

/// Planned changes to existing factions for one incoming faction.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub moved: Vec<MovedPlayer>,
    pub successions: Vec<Succession>,
    /// Final state of factions that lost members but survive.
    pub updated: Vec<Faction>,
    /// Factions left with no members, in the order they emptied.
    pub disbanded: Vec<FactionId>,
}

impl Reconciliation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }

    /// Write the plan to the store: unindex moved players, persist the
    /// surviving factions, then sweep the emptied ones.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Earlier writes are not rolled back.
    pub fn commit(&self, store: &dyn FactionStore) -> Result<()> {
        for moved in &self.moved {
            store.remove_player_from_index(&moved.player)?;
        }
        for faction in &self.updated {
            store.update_faction(faction)?;
        }
        for id in &self.disbanded {
            store.force_disband(id, DISBAND_REASON)?;
        }
        Ok(())
    }
}

/// Sort key for leader succession: most senior role, then longest tenure,
/// then player id as the final tie-break.
fn succession_key(member: &Member) -> (u8, chrono::DateTime<chrono::Utc>, PlayerId) {
    (member.role.rank(), member.joined_at, member.player_id)
}

/// Pick the member who should lead `faction`. `None` only when it is empty.
#[must_use]
pub fn elect_successor(faction: &Faction) -> Option<PlayerId> {
    faction
        .members
        .values()
        .min_by_key(|m| succession_key(m))
        .map(|m| m.player_id)
}

/// Plans membership moves for incoming factions.
#[derive(Debug, Clone, Default)]
pub struct MembershipReconciler {
    actor: Option<PlayerId>,
}

impl MembershipReconciler {
    #[must_use]
    pub const fn new(actor: Option<PlayerId>) -> Self {
        Self { actor }
    }

    /// Plan the changes needed before `incoming` can be committed.
    ///
    /// Members already in `incoming` under the same faction id are not
    /// moves. Factions are only marked while members are processed and are
    /// swept into `disbanded` at the end, so several departures from the same
    /// faction are all seen before it is judged empty.
    #[must_use]
    pub fn reconcile(&self, roster: &Roster, incoming: &Faction) -> Reconciliation {
        let mut touched: BTreeMap<FactionId, Faction> = BTreeMap::new();
        let mut emptied: Vec<FactionId> = Vec::new();
        let mut marked: BTreeSet<FactionId> = BTreeSet::new();
        let mut plan = Reconciliation::default();

        for player in incoming.members.keys() {
            let Some(owner) = roster.faction_of(player) else {
                continue;
            };
            if owner == incoming.id {
                continue;
            }
            if !touched.contains_key(&owner) {
                let Some(snapshot) = roster.get(&owner) else {
                    continue;
                };
                touched.insert(owner, snapshot.clone());
            }
            let Some(existing) = touched.get_mut(&owner) else {
                continue;
            };
            let Some(removed) = existing.members.remove(player) else {
                continue;
            };

            existing.log(
                LogKind::MemberLeft,
                format!(
                    "{} left (imported elsewhere) to join {}",
                    removed.username, incoming.name
                ),
                self.actor,
            );
            plan.moved.push(MovedPlayer {
                player: *player,
                from: owner,
                previous_role: removed.role,
            });
            tracing::debug!(
                player = %player,
                from = %owner,
                to = %incoming.id,
                "Player moved by import"
            );

            if removed.role == Role::Leader && existing.leader_count() == 0 {
                if let Some(successor) = elect_successor(existing) {
                    let name = existing
                        .members
                        .get_mut(&successor)
                        .map(|m| {
                            m.role = Role::Leader;
                            m.username.clone()
                        })
                        .unwrap_or_default();
                    existing.log(
                        LogKind::Succession,
                        format!("{name} succeeded {} as leader", removed.username),
                        self.actor,
                    );
                    plan.successions.push(Succession {
                        faction: owner,
                        previous: *player,
                        successor,
                    });
                }
            }

            if existing.is_empty() && marked.insert(owner) {
                emptied.push(owner);
            }
        }

        // Sweep: emptied factions are disbanded, the rest persisted.
        for (id, mut faction) in touched {
            if marked.contains(&id) {
                faction.log(LogKind::Disbanded, DISBAND_REASON, self.actor);
            } else {
                plan.updated.push(faction);
            }
        }
        plan.disbanded = emptied;
        plan
    }
}
