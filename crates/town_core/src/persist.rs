//! Best-effort durable mirror of the store.
//!
//! The scheduler stages a [`Snapshot`] after every tick; a background
//! [`WriteBehind`] worker keeps only the newest one and writes it on a fixed
//! interval. `flush` forces a write and waits for it, bounded by a timeout.
//! A failed save is logged and the town carries on in memory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::store::{MemoryStore, Store};
use crate::world::{Bounty, Character, Duel, Room, WorldState};

const COMMAND_CAPACITY: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub world: WorldState,
    pub characters: Vec<Character>,
    pub duels: Vec<Duel>,
    #[serde(default)]
    pub bounties: Vec<Bounty>,
    /// The newest events, oldest first.
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Snapshot {
    pub fn capture<S: Store>(store: &S, events: usize) -> Self {
        Self {
            world: store.world(),
            characters: store.characters(),
            duels: store.duels(),
            bounties: store.bounties(),
            events: store.recent_events(events),
        }
    }

    pub fn into_store(self, rooms: Vec<Room>, event_capacity: usize) -> MemoryStore {
        MemoryStore::restore(
            rooms,
            self.world,
            self.characters,
            self.duels,
            self.bounties,
            self.events,
            event_capacity,
        )
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<Snapshot>, PersistError>;
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError>;
}

/// One JSON document on disk, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(snapshot)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

/// Keeps the last saved snapshot in memory. Useful for tests and for running
/// without a state file.
#[derive(Clone, Debug, Default)]
pub struct MemorySnapshots {
    latest: Arc<Mutex<Option<Snapshot>>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self) -> Option<Snapshot> {
        self.latest.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshots {
    async fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        Ok(self.latest.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        *self.latest.lock().await = Some(snapshot.clone());
        Ok(())
    }
}

/// Load a snapshot, treating any failure as "nothing saved".
pub async fn load_or_none(store: &dyn SnapshotStore) -> Option<Snapshot> {
    match store.load().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "could not load snapshot, starting fresh");
            None
        }
    }
}

enum Command {
    Stage(Box<Snapshot>),
    Flush {
        snapshot: Box<Snapshot>,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to the background write-behind worker.
pub struct WriteBehind {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    flush_timeout: Duration,
}

impl WriteBehind {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn SnapshotStore>, interval: Duration, flush_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(run(store, rx, interval));
        Self {
            tx,
            task,
            flush_timeout,
        }
    }

    /// Replace the pending snapshot. Never waits; a full channel drops the
    /// snapshot since a newer one follows next tick.
    pub fn stage(&self, snapshot: Snapshot) {
        if self.tx.try_send(Command::Stage(Box::new(snapshot))).is_err() {
            debug!("write-behind busy, snapshot skipped");
        }
    }

    /// Write `snapshot` now and wait for the outcome.
    ///
    /// Returns `false` when the save failed or did not finish in time.
    pub async fn flush(&self, snapshot: Snapshot) -> bool {
        let (reply, done) = oneshot::channel();
        let command = Command::Flush {
            snapshot: Box::new(snapshot),
            reply,
        };
        let wait = async {
            self.tx.send(command).await.ok()?;
            done.await.ok()
        };
        match tokio::time::timeout(self.flush_timeout, wait).await {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                warn!("write-behind worker is gone");
                false
            }
            Err(_) => {
                warn!("snapshot flush timed out");
                false
            }
        }
    }

    /// Write whatever is pending and stop the worker.
    pub async fn shutdown(self) {
        if self.tx.send(Command::Shutdown).await.is_err() {
            return;
        }
        if let Err(err) = self.task.await {
            warn!(error = %err, "write-behind worker panicked");
        }
    }
}

async fn run(store: Arc<dyn SnapshotStore>, mut rx: mpsc::Receiver<Command>, interval: Duration) {
    let mut pending: Option<Box<Snapshot>> = None;
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(snapshot) = pending.take() {
                    save(store.as_ref(), &snapshot).await;
                }
            }
            command = rx.recv() => match command {
                Some(Command::Stage(snapshot)) => pending = Some(snapshot),
                Some(Command::Flush { snapshot, reply }) => {
                    pending = None;
                    let saved = save(store.as_ref(), &snapshot).await;
                    let _ = reply.send(saved);
                }
                Some(Command::Shutdown) | None => {
                    if let Some(snapshot) = pending.take() {
                        save(store.as_ref(), &snapshot).await;
                    }
                    info!("write-behind worker stopped");
                    break;
                }
            }
        }
    }
}

async fn save(store: &dyn SnapshotStore, snapshot: &Snapshot) -> bool {
    match store.save(snapshot).await {
        Ok(()) => {
            debug!(tick = snapshot.world.tick, "snapshot saved");
            true
        }
        Err(err) => {
            warn!(tick = snapshot.world.tick, error = %err, "snapshot save failed, continuing in memory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{CharacterId, Role, RoomId, Stats};

    struct Broken;

    #[async_trait]
    impl SnapshotStore for Broken {
        async fn load(&self) -> Result<Option<Snapshot>, PersistError> {
            Err(std::io::Error::new(ErrorKind::Other, "disk on fire").into())
        }

        async fn save(&self, _snapshot: &Snapshot) -> Result<(), PersistError> {
            Err(std::io::Error::new(ErrorKind::Other, "disk on fire").into())
        }
    }

    fn snapshot(tick: u64) -> Snapshot {
        let mut store = MemoryStore::new(Vec::new(), 8);
        let id = store.next_character_id();
        store
            .insert_character(Character::new(
                id,
                "Ada",
                Role::Doctor,
                Stats::new(4, 6, 7, 5),
                RoomId::new("street"),
            ))
            .expect("insert");
        for _ in 0..tick {
            store.advance_tick();
        }
        Snapshot::capture(&store, 8)
    }

    #[tokio::test]
    async fn json_file_round_trips_and_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("state").join("town.json"));
        assert!(store.load().await.expect("load").is_none());

        store.save(&snapshot(7)).await.expect("save");
        let loaded = store.load().await.expect("load").expect("snapshot");
        assert_eq!(loaded.world.tick, 7);
        assert_eq!(loaded.characters[0].id, CharacterId(1));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("town.json");
        tokio::fs::write(&path, b"{not json").await.expect("write");
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(PersistError::Json(_))));
        assert!(load_or_none(&store).await.is_none());
    }

    #[tokio::test]
    async fn flush_writes_immediately() {
        let memory = MemorySnapshots::new();
        let worker = WriteBehind::spawn(
            Arc::new(memory.clone()),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        );
        worker.stage(snapshot(1));
        assert!(worker.flush(snapshot(2)).await);
        assert_eq!(memory.latest().await.map(|s| s.world.tick), Some(2));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_writes_the_pending_snapshot() {
        let memory = MemorySnapshots::new();
        let worker = WriteBehind::spawn(
            Arc::new(memory.clone()),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        );
        worker.stage(snapshot(3));
        worker.stage(snapshot(4));
        worker.shutdown().await;
        assert_eq!(memory.latest().await.map(|s| s.world.tick), Some(4));
    }

    #[tokio::test]
    async fn failed_saves_do_not_stop_the_worker() {
        let worker = WriteBehind::spawn(
            Arc::new(Broken),
            Duration::from_millis(5),
            Duration::from_secs(5),
        );
        worker.stage(snapshot(1));
        assert!(!worker.flush(snapshot(2)).await);
        assert!(!worker.flush(snapshot(3)).await);
        worker.shutdown().await;
    }
}
