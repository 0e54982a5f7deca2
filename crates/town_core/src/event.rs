//! The append-only, bounded event log.
//!
//! Events are appended in tick order and, within a tick, in the order the
//! operations that caused them ran. Once the log reaches capacity the oldest
//! entries are evicted; ids keep increasing regardless.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::world::RoomId;

pub const DEFAULT_EVENT_CAPACITY: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Action,
    Enter,
    Leave,
    Combat,
    DuelChallenge,
    DuelResult,
    Ambient,
    WorldAnnouncement,
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub tick: u64,
    pub room: Option<RoomId>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub data: Option<Value>,
    pub narrative: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything about an event except the id and timestamp the log assigns.
#[derive(Clone, Debug, PartialEq)]
pub struct EventInput {
    pub kind: EventKind,
    pub tick: u64,
    pub room: Option<RoomId>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub data: Option<Value>,
    pub narrative: String,
}

impl EventInput {
    pub fn new(kind: EventKind, tick: u64, narrative: impl Into<String>) -> Self {
        Self {
            kind,
            tick,
            room: None,
            actor: None,
            action: None,
            data: None,
            narrative: narrative.into(),
        }
    }

    pub fn in_room(mut self, room: &RoomId) -> Self {
        self.room = Some(room.clone());
        self
    }

    pub fn by(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Clone, Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
    next_id: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    /// Rebuild a log from persisted events, keeping only the newest `capacity`.
    pub fn restore(events: Vec<Event>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        log.next_id = events.iter().map(|e| e.id + 1).max().unwrap_or(1);
        for event in events {
            log.push_back(event);
        }
        log
    }

    /// Stamp `input` with an id and the current time and append it.
    pub fn append(&mut self, input: EventInput) -> Event {
        let event = Event {
            id: self.next_id,
            kind: input.kind,
            tick: input.tick,
            room: input.room,
            actor: input.actor,
            action: input.action,
            data: input.data,
            narrative: input.narrative,
            timestamp: Utc::now(),
        };
        self.next_id += 1;
        self.push_back(event.clone());
        event
    }

    fn push_back(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest `limit` events across the whole town, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Newest `limit` events visible from `room`: its own events plus world
    /// announcements. Oldest first.
    pub fn recent_in_room(&self, room: &RoomId, limit: usize) -> Vec<Event> {
        let mut picked: Vec<Event> = self
            .events
            .iter()
            .rev()
            .filter(|e| e.room.as_ref() == Some(room) || e.kind == EventKind::WorldAnnouncement)
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    pub fn since_tick(&self, tick: u64) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.tick >= tick)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
