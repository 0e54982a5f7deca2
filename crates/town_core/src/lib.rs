pub mod action;
pub mod ambient;
pub mod clock;
pub mod combat;
pub mod distribute;
pub mod duel;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod handle;
pub mod narrate;
pub mod npc;
pub mod persist;
pub mod queue;
pub mod rng;
pub mod roster;
pub mod schedule;
pub mod store;
pub mod world;

pub mod io {
    pub mod frame;
    pub mod seed;
}

pub use action::{ActionKind, ActionOutcome, ActionRequest, Effect, Params};
pub use distribute::{Distributor, Observer, Reach, Subscription};
pub use engine::Engine;
pub use error::{ErrorCode, Rejection};
pub use event::{Event, EventKind};
pub use handle::{SchedulerGone, SchedulerHandle};
pub use io::seed::TownDef;
pub use narrate::{Narration, Narrator};
pub use roster::{Registration, RegistrationError};
pub use schedule::{Scheduler, TickReport};
pub use store::{MemoryStore, Store};

use std::sync::Arc;

/// A scheduler over a fresh in-memory town with template narration and no
/// persistence. NPCs are created; the clock sits at tick zero.
pub fn fresh_town(town: Arc<TownDef>, seed: u64) -> Result<Scheduler<MemoryStore>, store::StoreError> {
    let narration = town.narration();
    let store = MemoryStore::new(town.rooms.clone(), town.rules.event_capacity);
    let mut engine = Engine::new(store, town, narration, Distributor::default());
    engine.ensure_npcs()?;
    Ok(Scheduler::new(engine, seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_advances_world() {
        let town = Arc::new(TownDef::deadwood().expect("town"));
        let mut scheduler = fresh_town(town, 777).expect("scheduler");
        assert_eq!(scheduler.tick_count(), 0);
        let report = scheduler.tick().await.expect("not paused");
        assert_eq!(report.tick, 1);
        assert_eq!(scheduler.tick_count(), 1);
        assert_eq!(scheduler.engine().store.living_characters().len(), 3);
    }
}
