//! Ambient flavour lines keyed by room and time of day.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::clock::time_for_tick;
use crate::distribute::Reach;
use crate::engine::Engine;
use crate::event::{Event, EventInput, EventKind};
use crate::io::seed::TownDef;
use crate::store::Store;
use crate::world::RoomId;

pub const FALLBACK_LINE: &str = "The world holds its breath.";

/// Decides when an ambient line fires: a coin flip, but never twice within
/// `min_gap` ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct AmbientGate {
    last: u64,
    chance: f64,
    min_gap: u64,
}

impl AmbientGate {
    pub fn new(chance: f64, min_gap: u64) -> Self {
        Self {
            last: 0,
            chance: chance.clamp(0.0, 1.0),
            min_gap,
        }
    }

    pub fn should_fire<R: Rng + ?Sized>(&mut self, tick: u64, rng: &mut R) -> bool {
        if tick.saturating_sub(self.last) < self.min_gap {
            return false;
        }
        if !rng.gen_bool(self.chance) {
            return false;
        }
        self.last = tick;
        true
    }
}

/// A line for `room` at `tick`'s phase, or the fallback when the pool is empty.
pub fn pick_line<R: Rng + ?Sized>(town: &TownDef, room: &RoomId, tick: u64, rng: &mut R) -> String {
    let phase = time_for_tick(tick).phase;
    town.ambient
        .get(room)
        .and_then(|phases| phases.get(&phase))
        .and_then(|lines| lines.choose(rng))
        .cloned()
        .unwrap_or_else(|| FALLBACK_LINE.to_string())
}

impl<S: Store> Engine<S> {
    /// Maybe emit one ambient line in a random room.
    pub fn ambient<R: Rng + ?Sized>(
        &mut self,
        gate: &mut AmbientGate,
        tick: u64,
        rng: &mut R,
    ) -> Option<Event> {
        if !gate.should_fire(tick, rng) {
            return None;
        }
        let rooms = self.store.rooms();
        let room = rooms.choose(rng)?.id.clone();
        let line = pick_line(&self.town, &room, tick, rng);
        trace!(room = %room, tick, "ambient line");
        Some(self.emit(
            EventInput::new(EventKind::Ambient, tick, line).in_room(&room),
            Reach::Room,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn gate_respects_min_gap() {
        let mut gate = AmbientGate::new(1.0, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(!gate.should_fire(3, &mut rng));
        assert!(gate.should_fire(5, &mut rng));
        assert!(!gate.should_fire(9, &mut rng));
        assert!(gate.should_fire(10, &mut rng));
    }

    #[test]
    fn closed_gate_never_fires() {
        let mut gate = AmbientGate::new(0.0, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!((0..50).all(|t| !gate.should_fire(t, &mut rng)));
    }

    #[test]
    fn lines_follow_the_phase() {
        let town = TownDef::deadwood().expect("town");
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let saloon = RoomId::new("rusty_spur_saloon");
        let morning = pick_line(&town, &saloon, 0, &mut rng);
        let pool = &town.ambient[&saloon][&crate::clock::DayPhase::Morning];
        assert!(pool.contains(&morning));

        let nowhere = RoomId::new("mine");
        assert_eq!(pick_line(&town, &nowhere, 0, &mut rng), FALLBACK_LINE);
    }
}
