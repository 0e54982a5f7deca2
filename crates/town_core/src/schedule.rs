//! The tick scheduler.
//!
//! One call to [`Scheduler::tick`] runs one simulated step in a fixed order:
//! queued actions, NPCs, passive effects, ambient flavour, the duel sweep and
//! the dying sweep. Every stage draws from its own [`Stream`], derived from
//! the world seed and the tick, so a replay with the same seed and the same
//! queued actions reproduces the same rolls.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::action::{ActionOutcome, ActionRequest};
use crate::ambient::AmbientGate;
use crate::clock::{time_for_tick, GameTime};
use crate::distribute::{Distributor, Reach};
use crate::engine::Engine;
use crate::event::{Event, EventInput, EventKind};
use crate::fixed::{
    commit_delta, DYING_SAVE_WINDOW_TICKS, INTOXICATION_DECAY_TICKS, MAX_HEALTH,
    SLEEP_HP_REGEN_PER_TICK, TICKS_PER_HOUR,
};
use crate::io::seed::TownDef;
use crate::narrate::Narration;
use crate::npc::{decide, Intent, NpcView};
use crate::persist::{load_or_none, Snapshot, SnapshotStore, WriteBehind};
use crate::queue::ActionQueue;
use crate::rng::{stream_label, Stream};
use crate::roster::{Registration, RegistrationError};
use crate::store::{MemoryStore, Store, StoreError};
use crate::world::{Character, CharacterId, Status};

pub const STAGE_ACTIONS: &str = "tick:actions";
pub const STAGE_NPC: &str = "tick:npc";
pub const STAGE_AMBIENT: &str = "tick:ambient";
pub const STAGE_DUELS: &str = "tick:duels";
pub const STAGE_REGISTER: &str = "register";

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub const BLED_OUT: &str = "Bled out without medical attention";

/// One processed action inside a tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActorOutcome {
    pub actor: CharacterId,
    pub name: String,
    pub npc: bool,
    pub action: String,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub time: GameTime,
    pub outcomes: Vec<ActorOutcome>,
    /// Everything appended to the log during this tick, in order.
    pub events: Vec<Event>,
    /// Per-actor or per-sweep faults that were logged and skipped.
    pub failures: usize,
}

pub struct Scheduler<S> {
    engine: Engine<S>,
    queue: ActionQueue,
    seed: u64,
    ambient: AmbientGate,
    persistence: Option<WriteBehind>,
}

impl Scheduler<MemoryStore> {
    /// Build a scheduler over an in-memory store, restoring `snapshots` when
    /// they hold a saved town and re-creating any missing NPC.
    pub async fn boot(
        town: Arc<TownDef>,
        seed: u64,
        narration: Narration,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> anyhow::Result<Self> {
        let capacity = town.rules.event_capacity;
        let restored = match &snapshots {
            Some(store) => load_or_none(store.as_ref()).await,
            None => None,
        };
        let store = match restored {
            Some(snapshot) => {
                info!(tick = snapshot.world.tick, characters = snapshot.characters.len(), "restored snapshot");
                snapshot.into_store(town.rooms.clone(), capacity)
            }
            None => MemoryStore::new(town.rooms.clone(), capacity),
        };

        let mut engine = Engine::new(store, town, narration, Distributor::default());
        engine.ensure_npcs()?;
        let mut scheduler = Scheduler::new(engine, seed);
        if let Some(store) = snapshots {
            let interval = Duration::from_millis(scheduler.engine.town.rules.flush_interval_ms);
            scheduler.persistence = Some(WriteBehind::spawn(store, interval, FLUSH_TIMEOUT));
        }
        Ok(scheduler)
    }
}

impl<S: Store> Scheduler<S> {
    pub fn new(engine: Engine<S>, seed: u64) -> Self {
        let rules = &engine.town.rules;
        let ambient = AmbientGate::new(rules.ambient_chance, rules.ambient_min_gap);
        let queue = ActionQueue::with_paused(engine.store.world().paused);
        Self {
            engine,
            queue,
            seed,
            ambient,
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: WriteBehind) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<S> {
        &mut self.engine
    }

    pub fn queue(&self) -> ActionQueue {
        self.queue.clone()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tick_count(&self) -> u64 {
        self.engine.store.world().tick
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.engine.store, self.engine.town.rules.snapshot_events)
    }

    pub async fn pause(&mut self) {
        self.engine.store.set_paused(true);
        self.queue.set_paused(true).await;
        info!(tick = self.tick_count(), "world paused");
        self.stage_snapshot();
    }

    pub async fn resume(&mut self) {
        self.engine.store.set_paused(false);
        self.queue.set_paused(false).await;
        info!(tick = self.tick_count(), "world resumed");
        self.stage_snapshot();
    }

    /// Register an agent and force the new character to durable storage.
    pub async fn register(
        &mut self,
        registration: &Registration,
    ) -> Result<Character, RegistrationError> {
        let tick = self.tick_count();
        let mut rng = Stream::from(self.seed, STAGE_REGISTER, tick)
            .derive(stream_label(&registration.name.to_lowercase()));
        let character = self.engine.register(registration, &mut rng)?;
        if let Some(persistence) = &self.persistence {
            if !persistence.flush(self.snapshot()).await {
                warn!(name = %character.name, "registration not yet durable");
            }
        }
        Ok(character)
    }

    /// Run one tick. Returns `None` without touching the world while paused.
    pub async fn tick(&mut self) -> Option<TickReport> {
        if self.engine.store.world().paused {
            return None;
        }
        let tick = self.engine.store.advance_tick();
        self.engine.take_emitted();
        let root = Stream::from(self.seed, "tick", tick);
        let mut report = TickReport {
            tick,
            time: time_for_tick(tick),
            outcomes: Vec::new(),
            events: Vec::new(),
            failures: 0,
        };

        self.run_queued(tick, &root, &mut report).await;
        self.run_npcs(tick, &root, &mut report).await;
        report.failures += self.engine.apply_passive_effects(tick);

        let mut ambient_rng = root.derive(stream_label(STAGE_AMBIENT));
        self.engine.ambient(&mut self.ambient, tick, &mut ambient_rng);

        let mut duel_rng = root.derive(stream_label(STAGE_DUELS));
        let duels = self.engine.sweep_duels(tick, &mut duel_rng).await;
        report.failures += duels.failures;
        report.failures += self.engine.sweep_dying(tick);

        if tick % TICKS_PER_HOUR == 0 {
            info!(tick, time = %report.time.formatted, phase = %report.time.phase, "clock");
        }
        report.events = self.engine.take_emitted();
        self.stage_snapshot();
        Some(report)
    }

    async fn run_queued(&mut self, tick: u64, root: &Stream, report: &mut TickReport) {
        let stage = root.derive(stream_label(STAGE_ACTIONS));
        for (actor, request) in self.queue.drain().await {
            let mut rng = stage.derive(actor.0);
            self.run_one(actor, request, tick, &mut rng, report).await;
        }
    }

    async fn run_npcs(&mut self, tick: u64, root: &Stream, report: &mut TickReport) {
        let stage = root.derive(stream_label(STAGE_NPC));
        let town = Arc::clone(&self.engine.town);
        let npcs: Vec<Character> = self
            .engine
            .store
            .living_characters()
            .into_iter()
            .filter(|c| c.is_npc)
            .collect();

        for npc in npcs {
            let Some(def) = town.npc(&npc.name) else {
                continue;
            };
            let Some(npc) = self.engine.store.character(npc.id).filter(Character::is_alive) else {
                continue;
            };
            let mut rng = stage.derive(npc.id.0);
            let patrons: Vec<Character> = self
                .engine
                .store
                .characters_in_room(&npc.current_room)
                .into_iter()
                .filter(|c| !c.is_npc)
                .collect();
            let recent = self
                .engine
                .store
                .events_in_room(&npc.current_room, town.rules.npc_memory);
            let view = NpcView {
                npc: &npc,
                patrons: &patrons,
                recent: &recent,
                tick,
            };
            let Some(intent) = decide(&def.policy, town.rules.npc_act_chance, &view, &mut rng)
            else {
                continue;
            };
            let line = match &intent {
                Intent::Speak { situation, target } => Some(
                    self.engine
                        .narration
                        .npc_line(&npc, situation, target.as_deref(), &mut rng)
                        .await,
                ),
                Intent::Act(_) => None,
            };
            self.run_one(npc.id, intent.into_request(line), tick, &mut rng, report)
                .await;
        }
    }

    async fn run_one(
        &mut self,
        actor: CharacterId,
        request: ActionRequest,
        tick: u64,
        rng: &mut Stream,
        report: &mut TickReport,
    ) {
        let character = self.engine.store.character(actor);
        match self.engine.process(actor, &request, tick, rng).await {
            Ok(outcome) => report.outcomes.push(ActorOutcome {
                actor,
                name: character.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
                npc: character.as_ref().is_some_and(|c| c.is_npc),
                action: request.action,
                outcome,
            }),
            Err(err) => {
                error!(actor = %actor, action = %request.action, tick, error = %err, "action failed");
                report.failures += 1;
            }
        }
    }

    fn stage_snapshot(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.stage(self.snapshot());
        }
    }

    /// Flush a final snapshot and stop the persistence worker.
    pub async fn shutdown(mut self) {
        if let Some(persistence) = self.persistence.take() {
            persistence.flush(self.snapshot()).await;
            persistence.shutdown().await;
        }
    }
}

impl<S: Store> Engine<S> {
    /// Intoxication decay and sleep regeneration. Returns the number of
    /// characters that could not be updated.
    pub fn apply_passive_effects(&mut self, tick: u64) -> usize {
        let decay_tick = tick % INTOXICATION_DECAY_TICKS == 0;
        let mut failures = 0;
        for character in self.store.living_characters() {
            let sober_up = decay_tick && character.intoxication > 0;
            let rest = character.status == Status::Sleeping && character.health < MAX_HEALTH;
            if !sober_up && !rest {
                continue;
            }
            let updated = self.store.update_character(character.id, |c| {
                if sober_up {
                    c.intoxication -= 1;
                }
                if rest {
                    c.health =
                        commit_delta(c.health, i32::from(SLEEP_HP_REGEN_PER_TICK), MAX_HEALTH);
                }
            });
            if let Err(err) = updated {
                error!(character = %character.id, error = %err, "passive effects failed");
                failures += 1;
            }
        }
        failures
    }

    /// Kill every character whose save window has run out. Returns the number
    /// of characters that could not be processed.
    pub fn sweep_dying(&mut self, tick: u64) -> usize {
        let mut failures = 0;
        for character in self.store.living_characters() {
            if character.status != Status::Dying {
                continue;
            }
            let result = match character.dying_since {
                Some(since) if tick.saturating_sub(since) >= DYING_SAVE_WINDOW_TICKS => {
                    self.bleed_out(&character, tick).map(|_| ())
                }
                Some(_) => Ok(()),
                // A dying character restored without a start tick starts counting now.
                None => self
                    .store
                    .update_character(character.id, |c| c.dying_since = Some(tick))
                    .map(|_| ()),
            };
            if let Err(err) = result {
                error!(character = %character.id, error = %err, "dying sweep failed");
                failures += 1;
            }
        }
        failures
    }

    fn bleed_out(&mut self, character: &Character, tick: u64) -> Result<Event, StoreError> {
        self.store.kill_character(character.id, BLED_OUT)?;
        info!(name = %character.name, tick, "character died");
        Ok(self.emit(
            EventInput::new(
                EventKind::WorldAnnouncement,
                tick,
                format!("{} breathes their last. No doctor came.", character.name),
            )
            .in_room(&character.current_room)
            .by(&character.name)
            .data(json!({ "cause": BLED_OUT })),
            Reach::RoomAndGlobal,
        ))
    }
}

pub(crate) fn debug_report(report: &TickReport) {
    debug!(
        tick = report.tick,
        outcomes = report.outcomes.len(),
        events = report.events.len(),
        failures = report.failures,
        "tick complete"
    );
}
