//! The authoritative data store.
//!
//! [`Store`] is the repository the engine is generic over; [`MemoryStore`] is
//! the in-process implementation. Reads hand out owned copies so callers work
//! on snapshots, and every write goes through a method that re-establishes the
//! meter bounds and refuses to touch dead characters.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

use crate::event::{Event, EventInput, EventLog};
use crate::world::{
    Bounty, Character, CharacterId, Duel, DuelId, DuelStatus, Room, RoomId, Status, WorldState,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown character {0}")]
    UnknownCharacter(CharacterId),
    #[error("unknown duel {0}")]
    UnknownDuel(DuelId),
    #[error("a character named {0:?} already exists")]
    DuplicateName(String),
    #[error("character {0} is dead")]
    Dead(CharacterId),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait Store: Send + Sync {
    fn world(&self) -> WorldState;
    /// Advance the tick counter by one and return the new tick.
    fn advance_tick(&mut self) -> u64;
    fn set_paused(&mut self, paused: bool);

    fn room(&self, id: &RoomId) -> Option<Room>;
    fn rooms(&self) -> Vec<Room>;

    fn next_character_id(&mut self) -> CharacterId;
    fn insert_character(&mut self, character: Character) -> Result<()>;
    fn character(&self, id: CharacterId) -> Option<Character>;
    /// Case-insensitive lookup by display name.
    fn character_by_name(&self, name: &str) -> Option<Character>;
    /// Every character, dead ones included, ordered by id.
    fn characters(&self) -> Vec<Character>;
    /// Apply `mutate` to a living character and clamp its meters afterwards.
    fn update_character<F>(&mut self, id: CharacterId, mutate: F) -> Result<Character>
    where
        F: FnOnce(&mut Character);
    /// The terminal transition. Dead characters are never written again.
    fn kill_character(&mut self, id: CharacterId, cause: &str) -> Result<Character>;

    fn create_duel(
        &mut self,
        challenger: CharacterId,
        challenged: CharacterId,
        tick: u64,
    ) -> Duel;
    fn duel(&self, id: DuelId) -> Option<Duel>;
    fn duels(&self) -> Vec<Duel>;
    fn update_duel<F>(&mut self, id: DuelId, mutate: F) -> Result<Duel>
    where
        F: FnOnce(&mut Duel);

    fn bounties(&self) -> Vec<Bounty>;
    fn insert_bounty(&mut self, bounty: Bounty);

    fn append_event(&mut self, input: EventInput) -> Event;
    fn recent_events(&self, limit: usize) -> Vec<Event>;
    fn events_in_room(&self, room: &RoomId, limit: usize) -> Vec<Event>;
    fn events_since(&self, tick: u64) -> Vec<Event>;

    fn living_characters(&self) -> Vec<Character> {
        self.characters()
            .into_iter()
            .filter(Character::is_alive)
            .collect()
    }

    fn characters_in_room(&self, room: &RoomId) -> Vec<Character> {
        self.characters()
            .into_iter()
            .filter(|c| c.is_alive() && c.is_in_room(room))
            .collect()
    }

    fn graveyard(&self) -> Vec<Character> {
        self.characters()
            .into_iter()
            .filter(|c| !c.is_alive())
            .collect()
    }

    /// Living characters by reputation, highest first; ties keep id order.
    fn leaderboard(&self, limit: usize) -> Vec<Character> {
        let mut living = self.living_characters();
        living.sort_by(|a, b| b.reputation.cmp(&a.reputation));
        living.truncate(limit);
        living
    }

    fn active_bounties(&self) -> Vec<Bounty> {
        self.bounties().into_iter().filter(|b| b.is_active).collect()
    }

    fn active_duels(&self) -> Vec<Duel> {
        self.duels().into_iter().filter(Duel::is_active).collect()
    }

    /// The unresolved duel `id` takes part in, if any.
    fn active_duel_involving(&self, id: CharacterId) -> Option<Duel> {
        self.active_duels().into_iter().find(|d| d.involves(id))
    }

    /// A pending duel in which `id` is the challenged party.
    fn pending_duel_for(&self, id: CharacterId) -> Option<Duel> {
        self.active_duels()
            .into_iter()
            .find(|d| d.status == DuelStatus::Pending && d.challenged == id)
    }
}

#[derive(Clone, Debug)]
pub struct MemoryStore {
    world: WorldState,
    rooms: BTreeMap<RoomId, Room>,
    characters: BTreeMap<CharacterId, Character>,
    duels: BTreeMap<DuelId, Duel>,
    bounties: Vec<Bounty>,
    events: EventLog,
    next_character: u64,
    next_duel: u64,
}

impl MemoryStore {
    pub fn new(rooms: Vec<Room>, event_capacity: usize) -> Self {
        Self {
            world: WorldState::new(),
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            characters: BTreeMap::new(),
            duels: BTreeMap::new(),
            bounties: Vec::new(),
            events: EventLog::new(event_capacity),
            next_character: 1,
            next_duel: 1,
        }
    }

    /// Rebuild a store from previously persisted parts.
    pub fn restore(
        rooms: Vec<Room>,
        world: WorldState,
        characters: Vec<Character>,
        duels: Vec<Duel>,
        bounties: Vec<Bounty>,
        events: Vec<Event>,
        event_capacity: usize,
    ) -> Self {
        let next_character = characters.iter().map(|c| c.id.0 + 1).max().unwrap_or(1);
        let next_duel = duels.iter().map(|d| d.id.0 + 1).max().unwrap_or(1);
        Self {
            world,
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            characters: characters.into_iter().map(|c| (c.id, c)).collect(),
            duels: duels.into_iter().map(|d| (d.id, d)).collect(),
            bounties,
            events: EventLog::restore(events, event_capacity),
            next_character,
            next_duel,
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.characters
            .values()
            .any(|c| c.name.to_lowercase() == wanted)
    }
}

impl Store for MemoryStore {
    fn world(&self) -> WorldState {
        self.world.clone()
    }

    fn advance_tick(&mut self) -> u64 {
        self.world.tick += 1;
        self.world.tick
    }

    fn set_paused(&mut self, paused: bool) {
        self.world.paused = paused;
    }

    fn room(&self, id: &RoomId) -> Option<Room> {
        self.rooms.get(id).cloned()
    }

    fn rooms(&self) -> Vec<Room> {
        self.rooms.values().cloned().collect()
    }

    fn next_character_id(&mut self) -> CharacterId {
        let id = CharacterId(self.next_character);
        self.next_character += 1;
        id
    }

    fn insert_character(&mut self, mut character: Character) -> Result<()> {
        if self.name_taken(&character.name) {
            return Err(StoreError::DuplicateName(character.name));
        }
        character.clamp_meters();
        self.next_character = self.next_character.max(character.id.0 + 1);
        self.characters.insert(character.id, character);
        Ok(())
    }

    fn character(&self, id: CharacterId) -> Option<Character> {
        self.characters.get(&id).cloned()
    }

    fn character_by_name(&self, name: &str) -> Option<Character> {
        let wanted = name.trim().to_lowercase();
        self.characters
            .values()
            .find(|c| c.name.to_lowercase() == wanted)
            .cloned()
    }

    fn characters(&self) -> Vec<Character> {
        self.characters.values().cloned().collect()
    }

    fn update_character<F>(&mut self, id: CharacterId, mutate: F) -> Result<Character>
    where
        F: FnOnce(&mut Character),
    {
        let character = self
            .characters
            .get_mut(&id)
            .ok_or(StoreError::UnknownCharacter(id))?;
        if !character.is_alive() {
            return Err(StoreError::Dead(id));
        }
        mutate(character);
        // Only kill_character may write the terminal status.
        if character.status == Status::Dead {
            character.status = Status::Dying;
        }
        character.clamp_meters();
        Ok(character.clone())
    }

    fn kill_character(&mut self, id: CharacterId, cause: &str) -> Result<Character> {
        let character = self
            .characters
            .get_mut(&id)
            .ok_or(StoreError::UnknownCharacter(id))?;
        if !character.is_alive() {
            return Err(StoreError::Dead(id));
        }
        character.status = Status::Dead;
        character.health = 0;
        character.died_at = Some(Utc::now());
        character.cause_of_death = Some(cause.to_string());
        Ok(character.clone())
    }

    fn create_duel(
        &mut self,
        challenger: CharacterId,
        challenged: CharacterId,
        tick: u64,
    ) -> Duel {
        let duel = Duel::new(DuelId(self.next_duel), challenger, challenged, tick);
        self.next_duel += 1;
        self.duels.insert(duel.id, duel.clone());
        duel
    }

    fn duel(&self, id: DuelId) -> Option<Duel> {
        self.duels.get(&id).cloned()
    }

    fn duels(&self) -> Vec<Duel> {
        self.duels.values().cloned().collect()
    }

    fn update_duel<F>(&mut self, id: DuelId, mutate: F) -> Result<Duel>
    where
        F: FnOnce(&mut Duel),
    {
        let duel = self.duels.get_mut(&id).ok_or(StoreError::UnknownDuel(id))?;
        mutate(duel);
        Ok(duel.clone())
    }

    fn bounties(&self) -> Vec<Bounty> {
        self.bounties.clone()
    }

    fn insert_bounty(&mut self, bounty: Bounty) {
        self.bounties.push(bounty);
    }

    fn append_event(&mut self, input: EventInput) -> Event {
        self.events.append(input)
    }

    fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.events.recent(limit)
    }

    fn events_in_room(&self, room: &RoomId, limit: usize) -> Vec<Event> {
        self.events.recent_in_room(room, limit)
    }

    fn events_since(&self, tick: u64) -> Vec<Event> {
        self.events.since_tick(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Role, Stats};

    fn store_with(names: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new(Vec::new(), 16);
        for name in names {
            let id = store.next_character_id();
            let character = Character::new(
                id,
                *name,
                Role::Stranger,
                Stats::new(5, 5, 5, 5),
                RoomId::new("street"),
            );
            store.insert_character(character).expect("insert");
        }
        store
    }

    #[test]
    fn names_are_unique_ignoring_case() {
        let mut store = store_with(&["Ada"]);
        let id = store.next_character_id();
        let clash = Character::new(
            id,
            "ADA",
            Role::Outlaw,
            Stats::new(5, 5, 5, 5),
            RoomId::new("street"),
        );
        assert_eq!(
            store.insert_character(clash),
            Err(StoreError::DuplicateName("ADA".into()))
        );
        assert!(store.character_by_name("ada").is_some());
    }

    #[test]
    fn update_clamps_meters() {
        let mut store = store_with(&["Ada"]);
        let updated = store
            .update_character(CharacterId(1), |c| {
                c.reputation = 250;
                c.wanted_level = 9;
                c.intoxication = 40;
            })
            .expect("update");
        assert_eq!(updated.reputation, 100);
        assert_eq!(updated.wanted_level, 5);
        assert_eq!(updated.intoxication, 10);
    }

    #[test]
    fn dead_characters_are_frozen_and_hidden() {
        let mut store = store_with(&["Ada", "Bo"]);
        let dead = store
            .kill_character(CharacterId(1), "Bled out")
            .expect("kill");
        assert_eq!(dead.status, Status::Dead);
        assert_eq!(dead.cause_of_death.as_deref(), Some("Bled out"));
        assert!(dead.died_at.is_some());

        assert_eq!(
            store.update_character(CharacterId(1), |c| c.gold = 99),
            Err(StoreError::Dead(CharacterId(1)))
        );
        assert_eq!(
            store.kill_character(CharacterId(1), "again"),
            Err(StoreError::Dead(CharacterId(1)))
        );

        let living: Vec<String> = store.living_characters().into_iter().map(|c| c.name).collect();
        assert_eq!(living, vec!["Bo".to_string()]);
        assert!(store.characters_in_room(&RoomId::new("street")).iter().all(|c| c.name == "Bo"));
        assert_eq!(store.graveyard().len(), 1);
    }

    #[test]
    fn update_cannot_write_dead_status() {
        let mut store = store_with(&["Ada"]);
        let updated = store
            .update_character(CharacterId(1), |c| c.status = Status::Dead)
            .expect("update");
        assert_eq!(updated.status, Status::Dying);
    }

    #[test]
    fn leaderboard_orders_by_reputation() {
        let mut store = store_with(&["Ada", "Bo", "Cy"]);
        store
            .update_character(CharacterId(2), |c| c.reputation = 90)
            .expect("update");
        store
            .update_character(CharacterId(3), |c| c.reputation = 10)
            .expect("update");
        let names: Vec<String> = store.leaderboard(2).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Bo".to_string(), "Ada".to_string()]);
    }

    #[test]
    fn pending_duel_lookup_only_matches_challenged() {
        let mut store = store_with(&["Ada", "Bo"]);
        let duel = store.create_duel(CharacterId(1), CharacterId(2), 4);
        assert_eq!(store.pending_duel_for(CharacterId(2)).map(|d| d.id), Some(duel.id));
        assert!(store.pending_duel_for(CharacterId(1)).is_none());
        assert!(store.active_duel_involving(CharacterId(1)).is_some());

        store
            .update_duel(duel.id, |d| {
                d.advance(DuelStatus::Resolved);
            })
            .expect("update");
        assert!(store.active_duel_involving(CharacterId(1)).is_none());
    }
}
