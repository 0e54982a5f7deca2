//! Narration with a bounded wait and a deterministic fallback.
//!
//! An external [`Narrator`] may produce richer prose, but every call is wrapped
//! in a timeout; on timeout or error the line comes from a fixed template per
//! action kind, or from the NPC's own dialogue pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::clock::DayPhase;
use crate::world::{Character, Role, RoomId};

/// Everything a narrator is told about one action.
#[derive(Clone, Debug)]
pub struct NarrationRequest {
    pub actor: String,
    pub role: Role,
    pub reputation: u8,
    pub intoxication: u8,
    pub room: RoomId,
    pub phase: DayPhase,
    /// Action kind, e.g. `"say"` or `"duel_result"`.
    pub action: String,
    pub detail: String,
    pub others_present: Vec<String>,
    pub recent: Vec<String>,
}

impl NarrationRequest {
    pub fn new(
        actor: &Character,
        room: &RoomId,
        phase: DayPhase,
        action: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.name.clone(),
            role: actor.role,
            reputation: actor.reputation,
            intoxication: actor.intoxication,
            room: room.clone(),
            phase,
            action: action.to_string(),
            detail: detail.into(),
            others_present: Vec::new(),
            recent: Vec::new(),
        }
    }

    pub fn with_others(mut self, others: Vec<String>) -> Self {
        self.others_present = others;
        self
    }
}

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, request: &NarrationRequest) -> anyhow::Result<String>;

    async fn npc_dialogue(
        &self,
        npc: &Character,
        situation: &str,
        target: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// The fixed line used when no narrator answers.
pub fn template(request: &NarrationRequest) -> String {
    let name = &request.actor;
    let detail = &request.detail;
    match request.action.as_str() {
        "say" => format!("{name} speaks: \"{detail}\""),
        "whisper" => format!("{name} leans close and whispers."),
        "emote" => format!("{name} {detail}"),
        "look" => format!("{name} surveys the room with a careful eye."),
        "move" => format!("{name} {detail}."),
        "shoot" => format!("{detail}. The shot echoes."),
        "punch" => format!("{detail}."),
        "challenge" => format!("{name} {detail}."),
        "accept" => format!("{name} accepts the challenge. They step outside."),
        "decline" => format!("{name} backs down from the duel."),
        "duel_result" => detail.clone(),
        "buy" => format!("{name} {detail}."),
        "give" => format!("{name} hands something over."),
        "pay" => format!("{name} counts out some gold."),
        "heal" => format!("{name} {detail}."),
        "sleep" => format!("{name} settles in to rest."),
        "wait" => format!("{name} waits, watching."),
        _ => format!("{name} takes action."),
    }
}

/// Front door for all narration inside the engine.
#[derive(Clone)]
pub struct Narration {
    narrator: Option<Arc<dyn Narrator>>,
    timeout: Duration,
    dialogue: HashMap<String, Vec<String>>,
}

impl Narration {
    /// Templates and dialogue pools only.
    pub fn templates(dialogue: HashMap<String, Vec<String>>) -> Self {
        Self {
            narrator: None,
            timeout: Duration::ZERO,
            dialogue,
        }
    }

    /// Upper bound on every narrator call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn narrate(&self, request: &NarrationRequest) -> String {
        let Some(narrator) = &self.narrator else {
            return template(request);
        };
        match tokio::time::timeout(self.timeout, narrator.narrate(request)).await {
            Ok(Ok(line)) if !line.trim().is_empty() => line.trim().to_string(),
            Ok(Ok(_)) => template(request),
            Ok(Err(err)) => {
                warn!(action = %request.action, error = %err, "narrator failed, using template");
                template(request)
            }
            Err(_) => {
                warn!(action = %request.action, "narrator timed out, using template");
                template(request)
            }
        }
    }

    /// One line of NPC dialogue for `situation`.
    pub async fn npc_line<R: Rng + Send + ?Sized>(
        &self,
        npc: &Character,
        situation: &str,
        target: Option<&str>,
        rng: &mut R,
    ) -> String {
        if let Some(narrator) = &self.narrator {
            match tokio::time::timeout(self.timeout, narrator.npc_dialogue(npc, situation, target))
                .await
            {
                Ok(Ok(line)) if !line.trim().is_empty() => {
                    return line.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(npc = %npc.name, error = %err, "npc dialogue failed"),
                Err(_) => warn!(npc = %npc.name, "npc dialogue timed out"),
            }
        }
        self.fallback_line(&npc.name, rng)
    }

    fn fallback_line<R: Rng + ?Sized>(&self, npc: &str, rng: &mut R) -> String {
        self.dialogue
            .get(npc)
            .and_then(|lines| lines.choose(rng))
            .cloned()
            .unwrap_or_else(|| "...".to_string())
    }
}
