//! Fan-out of appended events to observers.
//!
//! The distributor appends to the store's event log and then publishes one
//! [`Delivery`] per event on a tokio broadcast channel. Sending never blocks:
//! a slow subscriber lags and skips ahead instead of holding up the tick.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::event::{Event, EventInput};
use crate::store::Store;
use crate::world::{CharacterId, RoomId};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Where an event is announced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reach {
    /// Observers of the event's room and the agents standing in it.
    Room,
    /// The room audience plus every observer.
    RoomAndGlobal,
    /// Every observer.
    Global,
}

/// Room audience captured at emit time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomAudience {
    pub room: RoomId,
    pub occupants: Vec<CharacterId>,
}

#[derive(Clone, Debug)]
pub struct Delivery {
    pub event: Arc<Event>,
    pub room: Option<RoomAudience>,
    pub global: bool,
}

/// Who a subscription is listening for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observer {
    /// A spectator watching some rooms; an empty set watches all of them.
    Spectator { rooms: HashSet<RoomId> },
    /// A connected agent; it hears its current room and global events.
    Agent { id: CharacterId },
}

impl Observer {
    pub fn everywhere() -> Self {
        Observer::Spectator {
            rooms: HashSet::new(),
        }
    }

    pub fn rooms<I: IntoIterator<Item = RoomId>>(rooms: I) -> Self {
        Observer::Spectator {
            rooms: rooms.into_iter().collect(),
        }
    }

    pub fn wants(&self, delivery: &Delivery) -> bool {
        if delivery.global {
            return true;
        }
        let Some(audience) = &delivery.room else {
            return false;
        };
        match self {
            Observer::Spectator { rooms } => rooms.is_empty() || rooms.contains(&audience.room),
            Observer::Agent { id } => audience.occupants.contains(id),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Distributor {
    tx: broadcast::Sender<Delivery>,
}

impl Distributor {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Append `input` to the store's log and announce it.
    pub fn emit<S: Store>(&self, store: &mut S, input: EventInput, reach: Reach) -> Event {
        let event = store.append_event(input);

        let room = match (reach, &event.room) {
            (Reach::Global, _) => None,
            (_, Some(room)) => Some(RoomAudience {
                room: room.clone(),
                occupants: store
                    .characters_in_room(room)
                    .into_iter()
                    .filter(|c| !c.is_npc)
                    .map(|c| c.id)
                    .collect(),
            }),
            (_, None) => None,
        };
        let global = reach != Reach::Room || room.is_none();

        let delivery = Delivery {
            event: Arc::new(event.clone()),
            room,
            global,
        };
        if self.tx.send(delivery).is_err() {
            trace!(event = event.id, "no subscribers");
        }
        event
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            observer,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Delivery>,
    observer: Observer,
}

impl Subscription {
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Change the rooms a spectator watches. Agents are unaffected.
    pub fn watch(&mut self, room: RoomId, on: bool) {
        if let Observer::Spectator { rooms } = &mut self.observer {
            if on {
                rooms.insert(room);
            } else {
                rooms.remove(&room);
            }
        }
    }

    /// Next event this observer should see, or `None` once the distributor
    /// is gone.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(delivery) if self.observer.wants(&delivery) => return Some(delivery.event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.try_recv() {
                Ok(delivery) if self.observer.wants(&delivery) => return Some(delivery.event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagged behind the event stream");
                }
                Err(_) => return None,
            }
        }
    }
}
