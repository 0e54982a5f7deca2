use std::sync::Arc;
use std::time::Duration;

use town_core::event::EventKind;
use town_core::io::frame::{make_frame, Frame};
use town_core::persist::{JsonFileStore, MemorySnapshots, SnapshotStore};
use town_core::schedule::BLED_OUT;
use town_core::event::{Event, EventInput};
use town_core::store::{self, StoreError};
use town_core::world::{
    Bounty, Character, CharacterId, Duel, DuelId, DuelStatus, Role, Room, RoomId, Status,
    WorldState,
};
use town_core::{
    fresh_town, ActionRequest, Distributor, Engine, ErrorCode, MemoryStore, Observer, Params,
    Registration, Scheduler, Store, TownDef,
};

fn quiet_town() -> Arc<TownDef> {
    let mut town = TownDef::deadwood().expect("built-in town");
    town.rules.npc_act_chance = 0.0;
    town.rules.ambient_chance = 0.0;
    Arc::new(town)
}

async fn join(scheduler: &mut Scheduler<MemoryStore>, name: &str, role: Role) -> Character {
    scheduler
        .register(&Registration::new(name, Some(role)))
        .await
        .expect("registration")
}

fn request(action: &str, target: Option<&str>) -> ActionRequest {
    ActionRequest::new(
        action,
        Params {
            target: target.map(str::to_string),
            ..Params::default()
        },
    )
}

fn character(scheduler: &Scheduler<MemoryStore>, name: &str) -> Character {
    scheduler
        .engine()
        .store
        .character_by_name(name)
        .expect("character exists")
}

#[tokio::test]
async fn one_action_per_character_per_tick() {
    let mut scheduler = fresh_town(quiet_town(), 11).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Stranger).await;
    let queue = scheduler.queue();

    queue.submit(ada.id, request("wait", None)).await.expect("first");
    let err = queue
        .submit(ada.id, request("say", None))
        .await
        .expect_err("second in the same tick");
    assert_eq!(err.code, ErrorCode::AlreadyActing);

    let report = scheduler.tick().await.expect("running");
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].action, "wait");

    queue
        .submit(ada.id, request("wait", None))
        .await
        .expect("next tick accepts again");
}

#[tokio::test]
async fn unanswered_challenges_expire() {
    let mut scheduler = fresh_town(quiet_town(), 12).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Gunslinger).await;
    join(&mut scheduler, "Bo", Role::Stranger).await;
    let queue = scheduler.queue();

    queue
        .submit(ada.id, request("challenge", Some("Bo")))
        .await
        .expect("queued");
    scheduler.tick().await.expect("tick 1");
    for _ in 2..=3 {
        scheduler.tick().await.expect("tick");
        let duel = &scheduler.engine().store.duels()[0];
        assert_eq!(duel.status, DuelStatus::Pending);
    }

    let report = scheduler.tick().await.expect("tick 4");
    let duel = &scheduler.engine().store.duels()[0];
    assert_eq!(duel.status, DuelStatus::Resolved);
    assert_eq!(duel.accepted_at, None);
    assert_eq!(duel.resolved_at, Some(4));
    assert_eq!(character(&scheduler, "Ada").reputation, 45);

    let announcement = report
        .events
        .iter()
        .find(|e| e.kind == EventKind::WorldAnnouncement)
        .expect("announcement");
    assert!(announcement.narrative.contains("expires unanswered"));
    assert_eq!(announcement.room, None);
}

#[tokio::test]
async fn accepted_duels_are_fought_in_the_street() {
    let mut scheduler = fresh_town(quiet_town(), 13).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Gunslinger).await;
    let bo = join(&mut scheduler, "Bo", Role::Stranger).await;
    let queue = scheduler.queue();

    queue
        .submit(ada.id, request("challenge", Some("Bo")))
        .await
        .expect("queued");
    scheduler.tick().await.expect("tick 1");
    queue.submit(bo.id, request("accept", None)).await.expect("queued");
    scheduler.tick().await.expect("tick 2");

    for name in ["Ada", "Bo"] {
        let duelist = character(&scheduler, name);
        assert_eq!(duelist.current_room, RoomId::new("street"));
        assert_eq!(duelist.status, Status::InDuel);
    }
    let duel = scheduler.engine().store.duels()[0].clone();
    assert_eq!(duel.status, DuelStatus::Accepted);
    assert_eq!(duel.accepted_at, Some(2));
    assert_eq!(duel.resolve_at, Some(4));

    queue.submit(ada.id, request("say", None)).await.expect("queued");
    let report = scheduler.tick().await.expect("tick 3");
    assert_eq!(report.outcomes[0].outcome.error_code, Some(ErrorCode::InDuel));
    assert_eq!(scheduler.engine().store.duels()[0].status, DuelStatus::Accepted);

    let report = scheduler.tick().await.expect("tick 4");
    let duel = scheduler.engine().store.duels()[0].clone();
    assert_eq!(duel.status, DuelStatus::Resolved);
    assert_eq!(duel.resolved_at, Some(4));

    let result = report
        .events
        .iter()
        .find(|e| e.kind == EventKind::DuelResult)
        .expect("duel result");
    assert_eq!(result.room, Some(RoomId::new("street")));
    let data = result.data.as_ref().expect("data");
    // One exchange cannot empty a full health bar.
    assert_eq!(data["fatal"], false);
    let winner = data["winner"].as_str().expect("a winner");
    assert_eq!(character(&scheduler, winner).reputation, 65);
    assert_eq!(duel.winner, Some(character(&scheduler, winner).id));
    for name in ["Ada", "Bo"] {
        assert_eq!(character(&scheduler, name).status, Status::Idle);
    }
}

/// A store whose writes to one character always fail.
struct Faulty {
    inner: MemoryStore,
    broken: Option<CharacterId>,
}

impl Store for Faulty {
    fn world(&self) -> WorldState {
        self.inner.world()
    }

    fn advance_tick(&mut self) -> u64 {
        self.inner.advance_tick()
    }

    fn set_paused(&mut self, paused: bool) {
        self.inner.set_paused(paused)
    }

    fn room(&self, id: &RoomId) -> Option<Room> {
        self.inner.room(id)
    }

    fn rooms(&self) -> Vec<Room> {
        self.inner.rooms()
    }

    fn next_character_id(&mut self) -> CharacterId {
        self.inner.next_character_id()
    }

    fn insert_character(&mut self, character: Character) -> store::Result<()> {
        self.inner.insert_character(character)
    }

    fn character(&self, id: CharacterId) -> Option<Character> {
        self.inner.character(id)
    }

    fn character_by_name(&self, name: &str) -> Option<Character> {
        self.inner.character_by_name(name)
    }

    fn characters(&self) -> Vec<Character> {
        self.inner.characters()
    }

    fn update_character<F>(&mut self, id: CharacterId, mutate: F) -> store::Result<Character>
    where
        F: FnOnce(&mut Character),
    {
        if self.broken == Some(id) {
            return Err(StoreError::UnknownCharacter(id));
        }
        self.inner.update_character(id, mutate)
    }

    fn kill_character(&mut self, id: CharacterId, cause: &str) -> store::Result<Character> {
        self.inner.kill_character(id, cause)
    }

    fn create_duel(&mut self, challenger: CharacterId, challenged: CharacterId, tick: u64) -> Duel {
        self.inner.create_duel(challenger, challenged, tick)
    }

    fn duel(&self, id: DuelId) -> Option<Duel> {
        self.inner.duel(id)
    }

    fn duels(&self) -> Vec<Duel> {
        self.inner.duels()
    }

    fn update_duel<F>(&mut self, id: DuelId, mutate: F) -> store::Result<Duel>
    where
        F: FnOnce(&mut Duel),
    {
        self.inner.update_duel(id, mutate)
    }

    fn bounties(&self) -> Vec<Bounty> {
        self.inner.bounties()
    }

    fn insert_bounty(&mut self, bounty: Bounty) {
        self.inner.insert_bounty(bounty)
    }

    fn append_event(&mut self, input: EventInput) -> Event {
        self.inner.append_event(input)
    }

    fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.inner.recent_events(limit)
    }

    fn events_in_room(&self, room: &RoomId, limit: usize) -> Vec<Event> {
        self.inner.events_in_room(room, limit)
    }

    fn events_since(&self, tick: u64) -> Vec<Event> {
        self.inner.events_since(tick)
    }
}

#[tokio::test]
async fn one_broken_actor_does_not_stop_the_tick() {
    let town = quiet_town();
    let store = Faulty {
        inner: MemoryStore::new(town.rooms.clone(), town.rules.event_capacity),
        broken: None,
    };
    let mut engine = Engine::new(store, town.clone(), town.narration(), Distributor::default());
    engine.ensure_npcs().expect("npcs");
    let mut scheduler = Scheduler::new(engine, 16);

    let mut ids = Vec::new();
    for name in ["Ada", "Bo", "Cy", "Dee", "Eve"] {
        let joined = scheduler
            .register(&Registration::new(name, Some(Role::Stranger)))
            .await
            .expect("registration");
        ids.push(joined.id);
    }
    let (ada, bo, cy, eve) = (ids[0], ids[1], ids[2], ids[4]);
    let queue = scheduler.queue();

    queue
        .submit(cy, request("challenge", Some("Dee")))
        .await
        .expect("queued");
    scheduler.tick().await.expect("tick 1");
    scheduler
        .engine_mut()
        .store
        .update_character(eve, |c| {
            c.take_damage(500, 1);
        })
        .expect("wound");
    scheduler.tick().await.expect("tick 2");
    scheduler.tick().await.expect("tick 3");

    scheduler.engine_mut().store.broken = Some(ada);
    queue.submit(ada, request("wait", None)).await.expect("queued");
    queue
        .submit(
            bo,
            ActionRequest::new(
                "say",
                Params {
                    text: Some("Quiet night.".into()),
                    ..Params::default()
                },
            ),
        )
        .await
        .expect("queued");
    let report = scheduler.tick().await.expect("tick 4");

    assert_eq!(report.failures, 1);
    assert!(report.outcomes.iter().all(|o| o.actor != ada));
    let said = report
        .outcomes
        .iter()
        .find(|o| o.actor == bo)
        .expect("bo still acted");
    assert!(said.outcome.success, "{}", said.outcome.narrative);

    let store = &scheduler.engine().store;
    assert_eq!(store.duels()[0].status, DuelStatus::Resolved);
    let eve = store.character(eve).expect("eve");
    assert_eq!(eve.status, Status::Dead);
    assert_eq!(eve.cause_of_death.as_deref(), Some(BLED_OUT));
}

#[tokio::test]
async fn reports_keep_every_event_of_a_busy_tick() {
    let mut town = TownDef::deadwood().expect("built-in town");
    town.rules.npc_act_chance = 0.0;
    town.rules.ambient_chance = 0.0;
    town.rules.event_capacity = 2;
    let mut scheduler = fresh_town(Arc::new(town), 17).expect("town");
    let queue = scheduler.queue();
    for name in ["Ada", "Bo", "Cy", "Dee"] {
        let joined = join(&mut scheduler, name, Role::Stranger).await;
        queue
            .submit(
                joined.id,
                ActionRequest::new(
                    "say",
                    Params {
                        text: Some(format!("{name} says howdy.")),
                        ..Params::default()
                    },
                ),
            )
            .await
            .expect("queued");
    }

    let report = scheduler.tick().await.expect("tick 1");
    assert_eq!(report.events.len(), 4);
    assert!(report.events.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(scheduler.engine().store.recent_events(10).len(), 2);

    let report = scheduler.tick().await.expect("tick 2");
    assert!(report.events.is_empty());
}

#[tokio::test]
async fn the_dying_bleed_out_after_the_save_window() {
    let mut scheduler = fresh_town(quiet_town(), 14).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Stranger).await;
    scheduler
        .engine_mut()
        .store
        .update_character(ada.id, |c| {
            c.take_damage(500, 0);
        })
        .expect("wound");

    for _ in 1..=2 {
        scheduler.tick().await.expect("tick");
        assert_eq!(character(&scheduler, "Ada").status, Status::Dying);
    }
    let report = scheduler.tick().await.expect("tick 3");

    let ada = character(&scheduler, "Ada");
    assert_eq!(ada.status, Status::Dead);
    assert_eq!(ada.cause_of_death.as_deref(), Some(BLED_OUT));
    assert!(ada.died_at.is_some());
    let store = &scheduler.engine().store;
    assert!(store.living_characters().iter().all(|c| c.id != ada.id));
    assert!(store.characters_in_room(&ada.current_room).iter().all(|c| c.id != ada.id));
    assert_eq!(store.graveyard().len(), 1);
    assert!(report
        .events
        .iter()
        .any(|e| e.kind == EventKind::WorldAnnouncement && e.narrative.contains("Ada")));

    for _ in 0..5 {
        scheduler.tick().await.expect("tick");
    }
    assert_eq!(character(&scheduler, "Ada").status, Status::Dead);
}

#[tokio::test]
async fn a_doctor_inside_the_window_saves_a_life() {
    let mut scheduler = fresh_town(quiet_town(), 15).expect("town");
    let doc = join(&mut scheduler, "Doc", Role::Doctor).await;
    let bo = join(&mut scheduler, "Bo", Role::Stranger).await;
    scheduler
        .engine_mut()
        .store
        .update_character(bo.id, |c| {
            c.take_damage(500, 0);
        })
        .expect("wound");

    scheduler.tick().await.expect("tick 1");
    scheduler
        .queue()
        .submit(doc.id, request("heal", Some("Bo")))
        .await
        .expect("queued");
    scheduler.tick().await.expect("tick 2");
    for _ in 0..4 {
        scheduler.tick().await.expect("tick");
    }

    let bo = character(&scheduler, "Bo");
    assert_eq!(bo.status, Status::Idle);
    assert_eq!(bo.health, 30);
    assert!(scheduler.engine().store.graveyard().is_empty());
}

#[tokio::test]
async fn passive_effects_run_each_tick() {
    let mut scheduler = fresh_town(quiet_town(), 16).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Stranger).await;
    scheduler
        .engine_mut()
        .store
        .update_character(ada.id, |c| {
            c.intoxication = 3;
            c.health = 50;
            c.status = Status::Sleeping;
        })
        .expect("setup");

    scheduler.tick().await.expect("tick 1");
    let after = character(&scheduler, "Ada");
    assert_eq!(after.health, 55);
    assert_eq!(after.intoxication, 3);

    for _ in 2..=12 {
        scheduler.tick().await.expect("tick");
    }
    let after = character(&scheduler, "Ada");
    assert_eq!(after.intoxication, 2);
    assert_eq!(after.health, 100);
}

#[tokio::test]
async fn paused_worlds_stand_still() {
    let mut scheduler = fresh_town(quiet_town(), 17).expect("town");
    let ada = join(&mut scheduler, "Ada", Role::Stranger).await;
    scheduler.tick().await.expect("tick 1");

    scheduler.pause().await;
    assert!(scheduler.tick().await.is_none());
    assert!(scheduler.tick().await.is_none());
    assert_eq!(scheduler.tick_count(), 1);
    let err = scheduler
        .queue()
        .submit(ada.id, request("wait", None))
        .await
        .expect_err("paused");
    assert_eq!(err.code, ErrorCode::WorldPaused);

    scheduler.resume().await;
    let report = scheduler.tick().await.expect("running again");
    assert_eq!(report.tick, 2);
}

#[tokio::test]
async fn same_seed_same_frames() {
    async fn run(seed: u64) -> Vec<Frame> {
        let town = Arc::new(TownDef::deadwood().expect("built-in town"));
        let mut scheduler = fresh_town(town, seed).expect("town");
        let ada = join(&mut scheduler, "Ada", Role::Gunslinger).await;
        let bo = join(&mut scheduler, "Bo", Role::Outlaw).await;
        let queue = scheduler.queue();
        let mut frames = Vec::new();
        for tick in 1..=40u64 {
            let (actor, action, target) = match tick % 5 {
                0 => (ada.id, "shoot", Some("Bo")),
                1 => (bo.id, "punch", Some("Ada")),
                2 => (ada.id, "buy", None),
                3 => (bo.id, "challenge", Some("Ada")),
                _ => (ada.id, "accept", None),
            };
            let mut action = request(action, target);
            action.params.item = Some("beer".into());
            let _ = queue.submit(actor, action).await;
            let report = scheduler.tick().await.expect("running");
            frames.push(make_frame(&report));
        }
        frames
    }

    let first = run(99).await;
    let second = run(99).await;
    assert_eq!(first.len(), 40);
    assert_eq!(first, second);
    assert!(first.iter().any(|f| !f.events.is_empty()));
}

#[tokio::test]
async fn registration_is_durable_and_restored() {
    let snapshots = MemorySnapshots::new();
    let store: Arc<dyn SnapshotStore> = Arc::new(snapshots.clone());
    let town = quiet_town();
    let narration = town.narration();

    let mut scheduler = Scheduler::boot(town.clone(), 21, narration.clone(), Some(store.clone()))
        .await
        .expect("boot");
    join(&mut scheduler, "Ada", Role::Businessman).await;
    let saved = snapshots.latest().await.expect("flushed on registration");
    assert!(saved.characters.iter().any(|c| c.name == "Ada"));

    scheduler.tick().await.expect("tick 1");
    scheduler.tick().await.expect("tick 2");
    scheduler.shutdown().await;

    let restored = Scheduler::boot(town, 21, narration, Some(store))
        .await
        .expect("reboot");
    assert_eq!(restored.tick_count(), 2);
    let store = &restored.engine().store;
    assert_eq!(store.characters().len(), 4);
    assert_eq!(store.character_by_name("ada").expect("ada").role, Role::Businessman);
    assert!(store.character_by_name("Ruby LaRue").is_some());
}

#[tokio::test]
async fn json_state_files_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state").join("town.json");
    let town = quiet_town();
    let narration = town.narration();
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&path));

    let mut scheduler = Scheduler::boot(town.clone(), 5, narration.clone(), Some(store))
        .await
        .expect("boot");
    join(&mut scheduler, "Ada", Role::Preacher).await;
    scheduler.tick().await.expect("tick");
    scheduler.shutdown().await;
    assert!(path.exists());

    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&path));
    let restored = Scheduler::boot(town, 5, narration, Some(store))
        .await
        .expect("reboot");
    assert_eq!(restored.tick_count(), 1);
    assert!(restored.engine().store.character_by_name("Ada").is_some());
    restored.shutdown().await;
}

#[tokio::test]
async fn handles_drive_a_running_scheduler() {
    let scheduler = fresh_town(quiet_town(), 31).expect("town");
    let (handle, task) = scheduler.spawn(Duration::from_millis(10));

    let ada = handle
        .register(Registration::new("Ada", None))
        .await
        .expect("running")
        .expect("registered");
    assert_eq!(ada.role, Role::Stranger);
    let dup = handle
        .register(Registration::new("ADA", None))
        .await
        .expect("running");
    assert!(dup.is_err());

    let mut observer = handle.subscribe(Observer::rooms([RoomId::new("rusty_spur_saloon")]));
    let mut reports = handle.reports();
    let say = ActionRequest::new(
        "say",
        Params {
            text: Some("Evening.".into()),
            ..Params::default()
        },
    );
    handle.submit(ada.id, say).await.expect("queued");

    let heard = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .expect("in time")
        .expect("event");
    assert_eq!(heard.actor.as_deref(), Some("Ada"));
    assert_eq!(heard.kind, EventKind::Action);

    let report = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(report) = reports.recv().await {
                if !report.outcomes.is_empty() || report.tick > 50 {
                    return report;
                }
            }
        }
    })
    .await
    .expect("in time");
    assert!(report.tick >= 1);

    let living = handle
        .query(|engine| engine.store.living_characters().len())
        .await
        .expect("running");
    assert_eq!(living, 4);

    handle.pause().await.expect("running");
    let paused = handle
        .query(|engine| engine.store.world().paused)
        .await
        .expect("running");
    assert!(paused);

    handle.stop().await.expect("running");
    task.await.expect("scheduler task");
    assert!(handle.query(|engine| engine.store.world().tick).await.is_err());
}
