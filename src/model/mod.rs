//! Core data types for `faction_migrate`.
//!
//! This module defines the canonical (target-side) types:
//! - `Faction` - A faction with its members, claims and relations
//! - `Member` / `Role` - Faction membership
//! - `ChunkCoordinate` - The unit of land ownership
//! - `Zone` / `ZoneKind` - Admin-defined chunk sets (safe/war)
//! - `FactionLogEntry` - Per-faction audit log

use crate::error::MigrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque unique faction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactionId(pub Uuid);

impl FactionId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FactionId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| MigrationError::InvalidId { id: s.to_string() })
    }
}

/// Player identifier (the game's account UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlayerId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| MigrationError::InvalidId { id: s.to_string() })
    }
}

/// A chunk position: world name plus 2D chunk coordinate.
///
/// Ordering is world first, then `x`, then `z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoordinate {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl ChunkCoordinate {
    #[must_use]
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// The four edge-adjacent neighbors (north, south, east, west).
    ///
    /// Coordinates at the `i32` boundary have fewer neighbors.
    #[must_use]
    pub fn neighbors(&self) -> Vec<Self> {
        let mut out = Vec::with_capacity(4);
        for (dx, dz) in [(0, -1), (0, 1), (1, 0), (-1, 0)] {
            if let (Some(x), Some(z)) = (self.x.checked_add(dx), self.z.checked_add(dz)) {
                out.push(Self::new(self.world.clone(), x, z));
            }
        }
        out
    }

    /// True if `other` is in the same world and differs by exactly one unit on one axis.
    #[must_use]
    pub fn is_adjacent(&self, other: &Self) -> bool {
        if self.world != other.world {
            return false;
        }
        let dx = (i64::from(self.x) - i64::from(other.x)).abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).abs();
        dx + dz == 1
    }
}

impl fmt::Display for ChunkCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.world, self.x, self.z)
    }
}

/// Membership role within a faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Officer,
    #[default]
    Member,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Officer => "officer",
            Self::Member => "member",
        }
    }

    /// Lower is more senior.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Leader => 0,
            Self::Officer => 1,
            Self::Member => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leader" => Ok(Self::Leader),
            "officer" => Ok(Self::Officer),
            "member" => Ok(Self::Member),
            other => Err(MigrationError::validation(
                "role",
                format!("unknown role '{other}'"),
            )),
        }
    }
}

/// A faction member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub player_id: PlayerId,
    pub username: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_online: DateTime<Utc>,
}

/// Diplomatic relation towards another faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Ally,
    Enemy,
}

impl Relation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ally => "ally",
            Self::Enemy => "enemy",
        }
    }
}

impl FromStr for Relation {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ally" | "allied" | "alliance" => Ok(Self::Ally),
            "enemy" | "hostile" | "war" => Ok(Self::Enemy),
            other => Err(MigrationError::validation(
                "relation",
                format!("unsupported relation '{other}'"),
            )),
        }
    }
}

/// Faction home location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

/// Faction log entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Imported,
    MemberLeft,
    Succession,
    Disbanded,
}

impl LogKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::MemberLeft => "member_left",
            Self::Succession => "succession",
            Self::Disbanded => "disbanded",
        }
    }
}

impl FromStr for LogKind {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported" => Ok(Self::Imported),
            "member_left" => Ok(Self::MemberLeft),
            "succession" => Ok(Self::Succession),
            "disbanded" => Ok(Self::Disbanded),
            other => Err(MigrationError::validation(
                "log_kind",
                format!("unknown log kind '{other}'"),
            )),
        }
    }
}

/// An entry in a faction's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionLogEntry {
    pub at: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<PlayerId>,
}

/// A canonical faction as held by the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub name: String,
    pub tag: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<Home>,
    #[serde(default)]
    pub members: BTreeMap<PlayerId, Member>,
    #[serde(default)]
    pub claims: BTreeSet<ChunkCoordinate>,
    #[serde(default)]
    pub relations: BTreeMap<FactionId, Relation>,
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    #[serde(default)]
    pub logs: Vec<FactionLogEntry>,
}

impl Faction {
    /// Create an empty faction with the given identity.
    #[must_use]
    pub fn new(id: FactionId, name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tag: tag.into(),
            color: "#55FFFF".to_string(),
            description: None,
            created_at: Utc::now(),
            home: None,
            members: BTreeMap::new(),
            claims: BTreeSet::new(),
            relations: BTreeMap::new(),
            permissions: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    /// Case-insensitive name key used for uniqueness checks.
    #[must_use]
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }

    #[must_use]
    pub fn leader(&self) -> Option<&Member> {
        self.members.values().find(|m| m.role == Role::Leader)
    }

    #[must_use]
    pub fn leader_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.role == Role::Leader)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Append a log entry stamped with the current time.
    pub fn log(&mut self, kind: LogKind, message: impl Into<String>, actor: Option<PlayerId>) {
        self.logs.push(FactionLogEntry {
            at: Utc::now(),
            kind,
            message: message.into(),
            actor,
        });
    }
}

/// Admin zone category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Safe,
    War,
}

impl ZoneKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::War => "war",
        }
    }

    /// Flag overrides applied to zones of this kind on creation.
    #[must_use]
    pub fn default_flags(&self) -> BTreeMap<String, bool> {
        let flags: &[(&str, bool)] = match self {
            Self::Safe => &[("pvp", false), ("build", false)],
            Self::War => &[("pvp", true)],
        };
        flags
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect()
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "safe" | "safezone" | "safe_zone" => Ok(Self::Safe),
            "war" | "warzone" | "war_zone" => Ok(Self::War),
            other => Err(MigrationError::validation(
                "zone_kind",
                format!("unknown zone kind '{other}'"),
            )),
        }
    }
}

/// An admin zone: a named set of chunks in one world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub kind: ZoneKind,
    pub world: String,
    pub chunks: BTreeSet<ChunkCoordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(n: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(n))
    }

    #[test]
    fn test_chunk_adjacency() {
        let origin = ChunkCoordinate::new("world", 0, 0);
        assert!(origin.is_adjacent(&ChunkCoordinate::new("world", 0, 1)));
        assert!(origin.is_adjacent(&ChunkCoordinate::new("world", -1, 0)));
        assert!(!origin.is_adjacent(&ChunkCoordinate::new("world", 1, 1)));
        assert!(!origin.is_adjacent(&ChunkCoordinate::new("nether", 0, 1)));
        assert!(!origin.is_adjacent(&origin));
    }

    #[test]
    fn test_neighbors_at_boundary() {
        let edge = ChunkCoordinate::new("world", i32::MAX, 0);
        let neighbors = edge.neighbors();
        assert_eq!(neighbors.len(), 3);
        assert!(neighbors.iter().all(|n| edge.is_adjacent(n)));
    }

    #[test]
    fn test_chunk_ordering_is_world_first() {
        let a = ChunkCoordinate::new("a", 100, 100);
        let b = ChunkCoordinate::new("b", -100, -100);
        assert!(a < b);
    }

    #[test]
    fn test_faction_id_parse() {
        let id: FactionId = "6f1c1f4e-8d0a-4a53-9a55-0d6b8e0b9f11".parse().unwrap();
        assert_eq!(id.to_string(), "6f1c1f4e-8d0a-4a53-9a55-0d6b8e0b9f11");
        assert!("not-a-uuid".parse::<FactionId>().is_err());
    }

    #[test]
    fn test_role_rank_and_parse() {
        assert!(Role::Leader.rank() < Role::Officer.rank());
        assert!(Role::Officer.rank() < Role::Member.rank());
        assert_eq!("OFFICER".parse::<Role>().unwrap(), Role::Officer);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_leader_lookup() {
        let mut faction = Faction::new(FactionId::new_random(), "Alpha", "ALP");
        assert!(faction.leader().is_none());
        faction.members.insert(
            player(1),
            Member {
                player_id: player(1),
                username: "one".to_string(),
                role: Role::Leader,
                joined_at: Utc::now(),
                last_online: Utc::now(),
            },
        );
        assert_eq!(faction.leader().unwrap().player_id, player(1));
        assert_eq!(faction.leader_count(), 1);
    }

    #[test]
    fn test_zone_kind_flags() {
        assert_eq!(ZoneKind::Safe.default_flags().get("pvp"), Some(&false));
        assert_eq!(ZoneKind::War.default_flags().get("pvp"), Some(&true));
        assert_eq!("SafeZone".parse::<ZoneKind>().unwrap(), ZoneKind::Safe);
    }
}
