use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::fixed::{
    clamp_stat, clamp_u8, MAX_HEALTH, MAX_INTOXICATION, MAX_REPUTATION, MAX_WANTED_LEVEL,
    STARTING_REPUTATION,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c:{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuelId(pub u64);

impl fmt::Display for DuelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d:{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Stranger,
    Businessman,
    BountyHunter,
    Outlaw,
    Gunslinger,
    TownFolk,
    Doctor,
    Preacher,
    Sheriff,
    Bartender,
    PianoMan,
    Madam,
}

impl Role {
    /// Roles an agent may pick at registration; the rest belong to NPCs.
    pub const VISITOR: [Role; 8] = [
        Role::Stranger,
        Role::Businessman,
        Role::BountyHunter,
        Role::Outlaw,
        Role::Gunslinger,
        Role::TownFolk,
        Role::Doctor,
        Role::Preacher,
    ];

    pub fn is_visitor(self) -> bool {
        Self::VISITOR.contains(&self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    InDuel,
    Arrested,
    Sleeping,
    Dying,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub grit: u8,
    pub charm: u8,
    pub cunning: u8,
    pub luck: u8,
}

impl Stats {
    pub fn new(grit: u8, charm: u8, cunning: u8, luck: u8) -> Self {
        Self {
            grit,
            charm,
            cunning,
            luck,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            grit: clamp_stat(i32::from(self.grit)),
            charm: clamp_stat(i32::from(self.charm)),
            cunning: clamp_stat(i32::from(self.cunning)),
            luck: clamp_stat(i32::from(self.luck)),
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub role: Role,
    pub stats: Stats,
    pub gold: u32,
    pub health: u8,
    pub reputation: u8,
    pub wanted_level: u8,
    pub intoxication: u8,
    pub current_room: RoomId,
    pub inventory: Vec<String>,
    pub status: Status,
    pub last_action_tick: Option<u64>,
    /// Tick at which health reached zero; cleared when a doctor intervenes.
    pub dying_since: Option<u64>,
    pub is_npc: bool,
    pub is_protected: bool,
    pub backstory: Option<String>,
    pub created_at: DateTime<Utc>,
    pub died_at: Option<DateTime<Utc>>,
    pub cause_of_death: Option<String>,
}

impl Character {
    /// A healthy, idle character with empty pockets.
    pub fn new(
        id: CharacterId,
        name: impl Into<String>,
        role: Role,
        stats: Stats,
        room: RoomId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            stats: stats.clamped(),
            gold: 0,
            health: MAX_HEALTH,
            reputation: STARTING_REPUTATION,
            wanted_level: 0,
            intoxication: 0,
            current_room: room,
            inventory: Vec::new(),
            status: Status::Idle,
            last_action_tick: None,
            dying_since: None,
            is_npc: false,
            is_protected: false,
            backstory: None,
            created_at: Utc::now(),
            died_at: None,
            cause_of_death: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status != Status::Dead
    }

    /// Pull every meter back inside its documented range.
    pub fn clamp_meters(&mut self) {
        self.stats = self.stats.clamped();
        self.health = self.health.min(MAX_HEALTH);
        self.reputation = self.reputation.min(MAX_REPUTATION);
        self.wanted_level = self.wanted_level.min(MAX_WANTED_LEVEL);
        self.intoxication = self.intoxication.min(MAX_INTOXICATION);
    }

    /// Subtract `damage` from health and enter `dying` when health runs out.
    ///
    /// Returns the new health value.
    pub fn take_damage(&mut self, damage: u32, tick: u64) -> u8 {
        let damage = i32::try_from(damage).unwrap_or(i32::MAX);
        self.health = clamp_u8(i32::from(self.health).saturating_sub(damage), 0, MAX_HEALTH);
        if self.health == 0 && self.status != Status::Dying {
            self.status = Status::Dying;
            self.dying_since = Some(tick);
        }
        self.health
    }

    pub fn is_in_room(&self, room: &RoomId) -> bool {
        &self.current_room == room
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub exits: Vec<RoomId>,
    #[serde(default)]
    pub is_safe_zone: bool,
    /// Whether the drink menu can be bought here.
    #[serde(default)]
    pub sells_drinks: bool,
}

impl Room {
    pub fn has_exit(&self, to: &RoomId) -> bool {
        self.exits.contains(to)
    }
}

/// Duel lifecycle. Variants are declared in lifecycle order; a duel only ever
/// moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    Pending,
    Accepted,
    InProgress,
    Resolved,
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duel {
    pub id: DuelId,
    pub challenger: CharacterId,
    pub challenged: CharacterId,
    pub status: DuelStatus,
    pub challenged_at: u64,
    pub accepted_at: Option<u64>,
    /// Tick at which the scheduler's duel sweep fires the exchange.
    pub resolve_at: Option<u64>,
    pub resolved_at: Option<u64>,
    pub winner: Option<CharacterId>,
    pub round: u32,
}

impl Duel {
    pub fn new(id: DuelId, challenger: CharacterId, challenged: CharacterId, tick: u64) -> Self {
        Self {
            id,
            challenger,
            challenged,
            status: DuelStatus::Pending,
            challenged_at: tick,
            accepted_at: None,
            resolve_at: None,
            resolved_at: None,
            winner: None,
            round: 0,
        }
    }

    /// Move to `next`, refusing backward or repeated transitions.
    pub fn advance(&mut self, next: DuelStatus) -> bool {
        if next <= self.status {
            return false;
        }
        self.status = next;
        true
    }

    pub fn is_active(&self) -> bool {
        self.status != DuelStatus::Resolved
    }

    pub fn involves(&self, id: CharacterId) -> bool {
        self.challenger == id || self.challenged == id
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    pub id: u64,
    pub target_name: String,
    pub amount: u32,
    pub reason: String,
    pub posted_by: String,
    pub posted_at: u64,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<u64>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub tick: u64,
    pub paused: bool,
    pub started_at: DateTime<Utc>,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            paused: false,
            started_at: Utc::now(),
        }
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}
