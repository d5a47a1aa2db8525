#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use faction_migrate::model::{Faction, FactionId, Member, PlayerId, Role};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

/// Fixed base time so fixtures are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0).unwrap() // 2025-01-01 00:00:00 UTC
}

pub fn player(n: u128) -> PlayerId {
    PlayerId(Uuid::from_u128(n))
}

pub fn faction_id(n: u128) -> FactionId {
    FactionId(Uuid::from_u128(0xF000_0000 + n))
}

/// An existing target faction. Members join one day apart in list order.
pub fn existing_faction(n: u128, name: &str, tag: &str, members: &[(u128, Role)]) -> Faction {
    let mut faction = Faction::new(faction_id(n), name, tag);
    faction.created_at = base_time();
    for (offset, (p, role)) in members.iter().enumerate() {
        let joined_at = base_time() + Duration::days(offset as i64);
        faction.members.insert(
            player(*p),
            Member {
                player_id: player(*p),
                username: format!("player{p}"),
                role: *role,
                joined_at,
                last_online: joined_at,
            },
        );
    }
    faction
}

/// Builder for one source faction record.
#[derive(Debug, Clone)]
pub struct SourceFixture {
    value: Value,
}

impl SourceFixture {
    pub fn new(n: u128, name: &str) -> Self {
        Self {
            value: json!({
                "id": faction_id(n).to_string(),
                "name": name,
                "created_at": "2024-06-01T00:00:00Z",
                "members": [],
            }),
        }
    }

    /// A record with no id at all.
    pub fn without_id(name: &str) -> Self {
        Self {
            value: json!({ "name": name, "members": [] }),
        }
    }

    pub fn member(mut self, p: u128, role: &str) -> Self {
        if let Some(members) = self.value["members"].as_array_mut() {
            members.push(json!({
                "id": player(p).to_string(),
                "name": format!("player{p}"),
                "role": role,
                "joined_at": "2024-06-01",
            }));
        }
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.value[key] = value;
        self
    }

    pub fn id(&self) -> String {
        self.value["id"].as_str().unwrap_or_default().to_string()
    }

    pub fn build(self) -> Value {
        self.value
    }
}

pub fn claim(faction: &SourceFixture, world: &str, x: i32, z: i32) -> Value {
    json!({ "faction": faction.id(), "world": world, "x": x, "z": z })
}

pub fn zone_chunk(world: &str, x: i32, z: i32, kind: &str) -> Value {
    json!({ "world": world, "x": x, "z": z, "kind": kind })
}

/// Everything one source directory holds.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    pub factions: Vec<Value>,
    pub claims: Vec<Value>,
    pub zones: Vec<Value>,
    pub names: Vec<(PlayerId, String)>,
}

impl SourceData {
    pub fn faction(mut self, fixture: SourceFixture) -> Self {
        self.factions.push(fixture.build());
        self
    }

    pub fn claims(mut self, claims: impl IntoIterator<Item = Value>) -> Self {
        self.claims.extend(claims);
        self
    }

    pub fn zones(mut self, zones: impl IntoIterator<Item = Value>) -> Self {
        self.zones.extend(zones);
        self
    }

    fn names_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .names
            .iter()
            .map(|(p, name)| (p.to_string(), Value::String(name.clone())))
            .collect();
        Value::Object(map)
    }

    /// Write the `jsonl` layout.
    pub fn write_jsonl(&self) -> TempDir {
        let dir = TempDir::new().unwrap();
        let lines = |values: &[Value]| {
            values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        };
        fs::write(dir.path().join("factions.jsonl"), lines(&self.factions)).unwrap();
        fs::write(dir.path().join("claims.jsonl"), lines(&self.claims)).unwrap();
        fs::write(dir.path().join("zones.jsonl"), lines(&self.zones)).unwrap();
        fs::write(dir.path().join("names.json"), self.names_json().to_string()).unwrap();
        dir
    }

    /// Write the `directory` layout.
    pub fn write_directory(&self) -> TempDir {
        let dir = TempDir::new().unwrap();
        let factions = dir.path().join("factions");
        fs::create_dir_all(&factions).unwrap();
        for (i, faction) in self.factions.iter().enumerate() {
            fs::write(factions.join(format!("{i:03}.json")), faction.to_string()).unwrap();
        }
        fs::write(dir.path().join("claims.json"), Value::from(self.claims.clone()).to_string())
            .unwrap();

        let mut zones = serde_json::Map::new();
        for chunk in &self.zones {
            let kind = chunk["kind"].as_str().unwrap_or("safe").to_string();
            let entry = zones.entry(kind).or_insert_with(|| Value::Array(Vec::new()));
            if let Some(list) = entry.as_array_mut() {
                list.push(json!({ "world": chunk["world"], "x": chunk["x"], "z": chunk["z"] }));
            }
        }
        fs::write(dir.path().join("zones.json"), Value::Object(zones).to_string()).unwrap();
        fs::write(dir.path().join("names.json"), self.names_json().to_string()).unwrap();
        dir
    }
}

pub fn path(dir: &TempDir) -> &Path {
    dir.path()
}
