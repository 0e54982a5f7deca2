use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::DayPhase;
use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::narrate::Narration;
use crate::npc::NpcPolicy;
use crate::world::{Role, Room, RoomId, Stats};

const DEADWOOD: &str = include_str!("../../data/deadwood.json");

/// Parsed town definition describing rooms, residents and engine rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TownDef {
    pub name: String,
    pub rooms: Vec<Room>,
    /// Where accepted duels are fought.
    pub duel_room: RoomId,
    /// Where newly registered agents appear.
    pub spawn_room: RoomId,
    #[serde(default)]
    pub npcs: Vec<NpcDef>,
    pub roles: HashMap<Role, RoleKit>,
    #[serde(default)]
    pub drinks: Vec<Drink>,
    #[serde(default)]
    pub ambient: HashMap<RoomId, HashMap<DayPhase, Vec<String>>>,
    #[serde(default)]
    pub rules: Rules,
}

/// A scripted resident created at bootstrap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NpcDef {
    pub name: String,
    pub role: Role,
    pub stats: Stats,
    pub gold: u32,
    #[serde(default = "default_reputation")]
    pub reputation: u8,
    #[serde(default)]
    pub intoxication: u8,
    pub room: RoomId,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default = "default_true")]
    pub protected: bool,
    /// Fallback lines when no narrator answers.
    #[serde(default)]
    pub dialogue: Vec<String>,
    #[serde(default)]
    pub policy: NpcPolicy,
}

/// What a freshly registered agent of a role starts with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleKit {
    pub stats: Stats,
    pub gold: u32,
    #[serde(default)]
    pub inventory: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drink {
    pub name: String,
    pub price: u32,
    pub intoxication: u8,
}

/// Tunable engine knobs. Every field has a default so documents may omit it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default = "default_npc_act_chance")]
    pub npc_act_chance: f64,
    #[serde(default = "default_ambient_chance")]
    pub ambient_chance: f64,
    #[serde(default = "default_ambient_min_gap")]
    pub ambient_min_gap: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Events the NPC engine sees from its room.
    #[serde(default = "default_npc_memory")]
    pub npc_memory: usize,
    #[serde(default = "default_narration_timeout_ms")]
    pub narration_timeout_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Events kept in a persisted snapshot.
    #[serde(default = "default_snapshot_events")]
    pub snapshot_events: usize,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            npc_act_chance: default_npc_act_chance(),
            ambient_chance: default_ambient_chance(),
            ambient_min_gap: default_ambient_min_gap(),
            event_capacity: default_event_capacity(),
            npc_memory: default_npc_memory(),
            narration_timeout_ms: default_narration_timeout_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            snapshot_events: default_snapshot_events(),
        }
    }
}

fn default_npc_act_chance() -> f64 {
    0.2
}

fn default_ambient_chance() -> f64 {
    0.2
}

fn default_ambient_min_gap() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_npc_memory() -> usize {
    5
}

fn default_narration_timeout_ms() -> u64 {
    2_000
}

fn default_flush_interval_ms() -> u64 {
    100
}

fn default_snapshot_events() -> usize {
    200
}

fn default_reputation() -> u8 {
    50
}

fn default_true() -> bool {
    true
}

impl TownDef {
    /// The built-in frontier town.
    pub fn deadwood() -> Result<Self> {
        Self::from_reader(DEADWOOD.as_bytes()).context("built-in town is invalid")
    }

    /// Load a town JSON document from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open town file {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Deserialize and validate a town document from an arbitrary reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let town: TownDef = serde_json::from_reader(reader).context("invalid town json")?;
        town.validate()?;
        Ok(town)
    }

    /// Check that every room reference resolves.
    pub fn validate(&self) -> Result<()> {
        let ids: HashSet<&RoomId> = self.rooms.iter().map(|r| &r.id).collect();
        ensure!(ids.len() == self.rooms.len(), "duplicate room ids");
        ensure!(ids.contains(&self.duel_room), "unknown duel room {}", self.duel_room);
        ensure!(ids.contains(&self.spawn_room), "unknown spawn room {}", self.spawn_room);
        for room in &self.rooms {
            for exit in &room.exits {
                ensure!(ids.contains(exit), "room {} has unknown exit {}", room.id, exit);
            }
        }
        for npc in &self.npcs {
            ensure!(ids.contains(&npc.room), "npc {} starts in unknown room {}", npc.name, npc.room);
        }
        ensure!(
            (0.0..=1.0).contains(&self.rules.npc_act_chance)
                && (0.0..=1.0).contains(&self.rules.ambient_chance),
            "chances must lie in [0, 1]"
        );
        Ok(())
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    /// Case-insensitive drink lookup.
    pub fn drink(&self, name: &str) -> Option<&Drink> {
        let wanted = name.trim().to_lowercase();
        self.drinks.iter().find(|d| d.name.to_lowercase() == wanted)
    }

    pub fn npc(&self, name: &str) -> Option<&NpcDef> {
        self.npcs.iter().find(|n| n.name == name)
    }

    /// NPC name to fallback dialogue lines.
    pub fn dialogue_pools(&self) -> HashMap<String, Vec<String>> {
        self.npcs
            .iter()
            .map(|n| (n.name.clone(), n.dialogue.clone()))
            .collect()
    }

    /// Template narration with this town's dialogue pools and narrator timeout.
    pub fn narration(&self) -> Narration {
        Narration::templates(self.dialogue_pools())
            .with_timeout(Duration::from_millis(self.rules.narration_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadwood_loads() {
        let town = TownDef::deadwood().expect("built-in town");
        assert_eq!(town.rooms.len(), 3);
        assert_eq!(town.duel_room, RoomId::new("street"));
        assert_eq!(town.npcs.len(), 3);
        assert!(town.npcs.iter().all(|n| n.protected));
        for role in Role::VISITOR {
            assert!(town.roles.contains_key(&role), "missing kit for {role:?}");
        }
        assert_eq!(town.drink("Whiskey").map(|d| d.price), Some(2));
        assert_eq!(town.rules, Rules::default());
        let saloon = town.room(&RoomId::new("rusty_spur_saloon")).expect("saloon");
        assert!(saloon.sells_drinks);
        assert!(saloon.has_exit(&RoomId::new("street")));
        assert!(!saloon.has_exit(&RoomId::new("jail")));
    }

    #[test]
    fn rules_fall_back_to_defaults() {
        let rules: Rules = serde_json::from_str(r#"{"ambient_min_gap": 9}"#).expect("rules parse");
        assert_eq!(rules.ambient_min_gap, 9);
        assert_eq!(rules.event_capacity, 1_000);
        assert_eq!(rules.snapshot_events, 200);
    }

    #[test]
    fn narration_takes_the_town_timeout() {
        let mut town = TownDef::deadwood().expect("built-in town");
        assert_eq!(town.narration().timeout(), Duration::from_millis(2_000));
        town.rules.narration_timeout_ms = 250;
        assert_eq!(town.narration().timeout(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_dangling_exits() {
        let json = r#"{
            "name": "broken",
            "rooms": [{"id": "a", "name": "A", "description": "", "exits": ["b"]}],
            "duel_room": "a",
            "spawn_room": "a",
            "roles": {}
        }"#;
        let err = TownDef::from_reader(json.as_bytes()).expect_err("dangling exit");
        assert!(err.to_string().contains("unknown exit"));
    }
}
