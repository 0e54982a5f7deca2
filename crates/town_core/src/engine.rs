use std::sync::Arc;

use crate::clock::time_for_tick;
use crate::distribute::{Distributor, Reach};
use crate::error::{ErrorCode, Rejection};
use crate::event::{Event, EventInput};
use crate::io::seed::TownDef;
use crate::narrate::{Narration, NarrationRequest};
use crate::store::Store;
use crate::world::{Character, Room, RoomId};

/// Number of recent room narratives handed to the narrator as context.
const NARRATION_CONTEXT: usize = 2;

/// The single writer over the town: store, fan-out and narration.
///
/// The action processor, the duel state machine and the scheduler's sweeps
/// are all implemented on this type.
pub struct Engine<S> {
    pub store: S,
    pub distributor: Distributor,
    pub narration: Narration,
    pub town: Arc<TownDef>,
    /// Events emitted since the last [`Engine::take_emitted`], independent of
    /// the bounded log.
    emitted: Vec<Event>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, town: Arc<TownDef>, narration: Narration, distributor: Distributor) -> Self {
        Self {
            store,
            distributor,
            narration,
            town,
            emitted: Vec::new(),
        }
    }

    /// Append an event and announce it with the given reach.
    pub fn emit(&mut self, input: EventInput, reach: Reach) -> Event {
        let event = self.distributor.emit(&mut self.store, input, reach);
        self.emitted.push(event.clone());
        event
    }

    pub fn take_emitted(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.emitted)
    }

    pub(crate) fn room_of(&self, character: &Character) -> Result<Room, Rejection> {
        self.store
            .room(&character.current_room)
            .ok_or_else(|| Rejection::forbidden("You are nowhere anyone can find."))
    }

    /// A living character named `name` standing in `actor`'s room.
    pub(crate) fn present_target(
        &self,
        actor: &Character,
        name: Option<&str>,
    ) -> Result<Character, Rejection> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Rejection::missing("target"))?;
        self.store
            .character_by_name(name)
            .filter(|t| t.is_alive() && t.is_in_room(&actor.current_room))
            .ok_or_else(|| Rejection::not_here(name))
    }

    /// Names of the other living characters in `room`.
    pub(crate) fn others_in(&self, room: &RoomId, except: &Character) -> Vec<String> {
        self.store
            .characters_in_room(room)
            .into_iter()
            .filter(|c| c.id != except.id)
            .map(|c| c.name)
            .collect()
    }

    pub(crate) async fn narrate(
        &self,
        actor: &Character,
        room: &RoomId,
        tick: u64,
        action: &str,
        detail: impl Into<String>,
        others: Vec<String>,
    ) -> String {
        let mut request =
            NarrationRequest::new(actor, room, time_for_tick(tick).phase, action, detail)
                .with_others(others);
        request.recent = self
            .store
            .events_in_room(room, NARRATION_CONTEXT)
            .into_iter()
            .map(|e| e.narrative)
            .collect();
        self.narration.narrate(&request).await
    }
}

pub(crate) fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, Rejection> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidParams, format!("Missing `{name}`.")))
}
