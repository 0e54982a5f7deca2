//! Agent registration and NPC bootstrap.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::Engine;
use crate::fixed::clamp_stat;
use crate::io::seed::NpcDef;
use crate::store::{Store, StoreError};
use crate::world::{Character, Role, Stats};

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 50;
pub const BACKSTORY_MAX_CHARS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub backstory: Option<String>,
}

impl Registration {
    pub fn new(name: impl Into<String>, role: Option<Role>) -> Self {
        Self {
            name: name.into(),
            role,
            backstory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("the name {0:?} is already taken")]
    NameTaken(String),
    #[error("role {0:?} is not open to newcomers")]
    RoleNotOpen(Role),
    #[error("invalid name: {0}")]
    InvalidName(&'static str),
    #[error("backstory must be at most {BACKSTORY_MAX_CHARS} characters")]
    BackstoryTooLong,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => RegistrationError::NameTaken(name),
            other => RegistrationError::Store(other),
        }
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let length = name.chars().count();
    if length < NAME_MIN_CHARS {
        return Err(RegistrationError::InvalidName("must be at least 2 characters"));
    }
    if length > NAME_MAX_CHARS {
        return Err(RegistrationError::InvalidName("must be at most 50 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphabetic() || c == ' ' || c == '-' || c == '\'')
    {
        return Err(RegistrationError::InvalidName(
            "only letters, spaces, hyphens and apostrophes are allowed",
        ));
    }
    Ok(())
}

/// Base stats shifted by -1, 0 or +1 each, clamped to the stat range.
pub fn vary_stats<R: Rng + ?Sized>(base: Stats, rng: &mut R) -> Stats {
    let mut vary = |stat: u8| clamp_stat(i32::from(stat) + rng.gen_range(-1..=1));
    Stats {
        grit: vary(base.grit),
        charm: vary(base.charm),
        cunning: vary(base.cunning),
        luck: vary(base.luck),
    }
}

fn npc_character(def: &NpcDef, character: Character) -> Character {
    Character {
        gold: def.gold,
        reputation: def.reputation,
        intoxication: def.intoxication,
        inventory: def.inventory.clone(),
        is_npc: true,
        is_protected: def.protected,
        backstory: def.backstory.clone(),
        ..character
    }
}

impl<S: Store> Engine<S> {
    /// Create a new agent in the spawn room.
    pub fn register<R: Rng + ?Sized>(
        &mut self,
        registration: &Registration,
        rng: &mut R,
    ) -> Result<Character, RegistrationError> {
        let name = registration.name.trim();
        validate_name(name)?;
        if registration
            .backstory
            .as_deref()
            .is_some_and(|b| b.chars().count() > BACKSTORY_MAX_CHARS)
        {
            return Err(RegistrationError::BackstoryTooLong);
        }
        let role = registration.role.unwrap_or(Role::Stranger);
        if !role.is_visitor() {
            return Err(RegistrationError::RoleNotOpen(role));
        }
        let kit = self
            .town
            .roles
            .get(&role)
            .cloned()
            .ok_or(RegistrationError::RoleNotOpen(role))?;
        if self.store.character_by_name(name).is_some() {
            return Err(RegistrationError::NameTaken(name.to_string()));
        }

        let id = self.store.next_character_id();
        let character = Character {
            gold: kit.gold,
            inventory: kit.inventory,
            backstory: registration.backstory.clone(),
            ..Character::new(
                id,
                name,
                role,
                vary_stats(kit.stats, rng),
                self.town.spawn_room.clone(),
            )
        };
        self.store.insert_character(character.clone())?;
        info!(id = %id, name, role = ?role, "agent registered");
        Ok(character)
    }

    /// Create any configured NPC that is not in the store yet.
    ///
    /// Returns how many were created.
    pub fn ensure_npcs(&mut self) -> Result<usize, StoreError> {
        let town = self.town.clone();
        let mut created = 0;
        for def in &town.npcs {
            if self.store.character_by_name(&def.name).is_some() {
                continue;
            }
            let id = self.store.next_character_id();
            let base = Character::new(id, def.name.as_str(), def.role, def.stats, def.room.clone());
            self.store.insert_character(npc_character(def, base))?;
            created += 1;
        }
        if created > 0 {
            info!(created, "npcs bootstrapped");
        }
        Ok(created)
    }
}
