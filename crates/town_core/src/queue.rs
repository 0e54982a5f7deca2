//! The pending-action queue.
//!
//! Clients submit at most one action per character per tick; the scheduler
//! drains everything at the start of each tick, in submission order.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::action::ActionRequest;
use crate::error::{ErrorCode, Rejection};
use crate::world::CharacterId;

#[derive(Debug, Default)]
struct Pending {
    order: Vec<(CharacterId, ActionRequest)>,
    paused: bool,
}

/// Cloneable handle to the shared queue.
#[derive(Clone, Debug, Default)]
pub struct ActionQueue {
    inner: Arc<Mutex<Pending>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that starts out paused or open, mirroring a restored world.
    pub fn with_paused(paused: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Pending {
                order: Vec::new(),
                paused,
            })),
        }
    }

    /// Queue `request` for the next tick.
    ///
    /// Refused with `WORLD_PAUSED` while paused and with `ALREADY_ACTING` if
    /// the character already has something queued.
    pub async fn submit(&self, actor: CharacterId, request: ActionRequest) -> Result<(), Rejection> {
        let mut pending = self.inner.lock().await;
        if pending.paused {
            return Err(Rejection::new(
                ErrorCode::WorldPaused,
                "The world is paused. Nothing moves.",
            ));
        }
        if pending.order.iter().any(|(id, _)| *id == actor) {
            return Err(Rejection::new(
                ErrorCode::AlreadyActing,
                "You already have an action pending this tick.",
            ));
        }
        pending.order.push((actor, request));
        Ok(())
    }

    /// Take every queued action, oldest first, leaving the queue empty.
    pub async fn drain(&self) -> Vec<(CharacterId, ActionRequest)> {
        std::mem::take(&mut self.inner.lock().await.order)
    }

    pub async fn set_paused(&self, paused: bool) {
        self.inner.lock().await.paused = paused;
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Params;

    fn wait() -> ActionRequest {
        ActionRequest::new("wait", Params::default())
    }

    #[tokio::test]
    async fn one_action_per_character_until_drained() {
        let queue = ActionQueue::new();
        queue.submit(CharacterId(1), wait()).await.expect("first");
        let err = queue.submit(CharacterId(1), wait()).await.expect_err("second");
        assert_eq!(err.code, ErrorCode::AlreadyActing);
        queue.submit(CharacterId(2), wait()).await.expect("other actor");

        let drained: Vec<CharacterId> = queue.drain().await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(drained, vec![CharacterId(1), CharacterId(2)]);
        assert!(queue.is_empty().await);
        queue.submit(CharacterId(1), wait()).await.expect("after drain");
    }

    #[tokio::test]
    async fn paused_queue_refuses_work() {
        let queue = ActionQueue::new();
        queue.set_paused(true).await;
        let err = queue.submit(CharacterId(1), wait()).await.expect_err("paused");
        assert_eq!(err.code, ErrorCode::WorldPaused);
        queue.set_paused(false).await;
        assert!(queue.submit(CharacterId(1), wait()).await.is_ok());
        assert_eq!(queue.len().await, 1);
    }
}
