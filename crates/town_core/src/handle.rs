//! Running a [`Scheduler`] on the wall clock.
//!
//! The scheduler task owns the engine outright. Everything else reaches it
//! through a [`SchedulerHandle`]: actions go straight into the shared queue,
//! observers subscribe to the distributor, and every other request travels
//! over a command channel and is served between ticks.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::action::ActionRequest;
use crate::distribute::{Distributor, Observer, Subscription};
use crate::engine::Engine;
use crate::error::Rejection;
use crate::queue::ActionQueue;
use crate::roster::{Registration, RegistrationError};
use crate::schedule::{debug_report, Scheduler, TickReport};
use crate::store::Store;
use crate::world::{Character, CharacterId};

const COMMAND_CAPACITY: usize = 64;
const REPORT_CAPACITY: usize = 16;

type Query<S> = Box<dyn FnOnce(&Engine<S>) + Send>;

enum Command<S> {
    Pause,
    Resume,
    Stop,
    Register {
        registration: Registration,
        reply: oneshot::Sender<Result<Character, RegistrationError>>,
    },
    Query(Query<S>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the scheduler is no longer running")]
pub struct SchedulerGone;

pub struct SchedulerHandle<S> {
    commands: mpsc::Sender<Command<S>>,
    queue: ActionQueue,
    distributor: Distributor,
    reports: broadcast::Sender<TickReport>,
}

impl<S> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            queue: self.queue.clone(),
            distributor: self.distributor.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl<S: Store + 'static> SchedulerHandle<S> {
    /// Queue an action for the next tick.
    pub async fn submit(&self, actor: CharacterId, request: ActionRequest) -> Result<(), Rejection> {
        self.queue.submit(actor, request).await
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.distributor.subscribe(observer)
    }

    /// Every completed tick's report.
    pub fn reports(&self) -> broadcast::Receiver<TickReport> {
        self.reports.subscribe()
    }

    pub async fn pause(&self) -> Result<(), SchedulerGone> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SchedulerGone> {
        self.send(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), SchedulerGone> {
        self.send(Command::Stop).await
    }

    pub async fn register(
        &self,
        registration: Registration,
    ) -> Result<Result<Character, RegistrationError>, SchedulerGone> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Register {
            registration,
            reply,
        })
        .await?;
        answer.await.map_err(|_| SchedulerGone)
    }

    /// Run `read` against the engine between ticks and return its result.
    pub async fn query<T, F>(&self, read: F) -> Result<T, SchedulerGone>
    where
        T: Send + 'static,
        F: FnOnce(&Engine<S>) -> T + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Query(Box::new(move |engine| {
            let _ = reply.send(read(engine));
        })))
        .await?;
        answer.await.map_err(|_| SchedulerGone)
    }

    async fn send(&self, command: Command<S>) -> Result<(), SchedulerGone> {
        self.commands.send(command).await.map_err(|_| SchedulerGone)
    }
}

impl<S: Store + 'static> Scheduler<S> {
    /// Move the scheduler onto its own task, ticking every `period`.
    pub fn spawn(self, period: Duration) -> (SchedulerHandle<S>, JoinHandle<()>) {
        let (commands, inbox) = mpsc::channel(COMMAND_CAPACITY);
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let handle = SchedulerHandle {
            commands,
            queue: self.queue(),
            distributor: self.engine().distributor.clone(),
            reports: reports.clone(),
        };
        let task = tokio::spawn(self.run(period, inbox, reports));
        (handle, task)
    }

    async fn run(
        mut self,
        period: Duration,
        mut inbox: mpsc::Receiver<Command<S>>,
        reports: broadcast::Sender<TickReport>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately.
        ticker.tick().await;
        info!(seed = self.seed(), tick = self.tick_count(), period_ms = period.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(report) = self.tick().await {
                        debug_report(&report);
                        let _ = reports.send(report);
                    }
                }
                command = inbox.recv() => match command {
                    Some(Command::Pause) => self.pause().await,
                    Some(Command::Resume) => self.resume().await,
                    Some(Command::Register { registration, reply }) => {
                        let _ = reply.send(self.register(&registration).await);
                    }
                    Some(Command::Query(read)) => read(self.engine()),
                    Some(Command::Stop) | None => break,
                }
            }
        }

        info!(tick = self.tick_count(), "scheduler stopping");
        self.shutdown().await;
    }
}
