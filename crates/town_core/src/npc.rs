//! Data-driven NPC behaviour.
//!
//! Each NPC carries an [`NpcPolicy`]: an ordered list of rules, each pairing a
//! trigger with a response. [`decide`] is pure over an [`NpcView`] snapshot;
//! it never touches the store, so it composes with the single-writer tick.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::action::{ActionRequest, Params};
use crate::event::{Event, EventKind};
use crate::world::{Character, Status};

/// Ordered rules; the first one that fires wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcPolicy {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub when: Trigger,
    pub then: Response,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// An event of one of `kinds` happened in the room within the last
    /// `within_ticks` ticks. The event's actor becomes the target.
    RecentEvent {
        kinds: Vec<EventKind>,
        within_ticks: u64,
    },
    /// An idle agent in the room carries more than `gold`.
    PatronGoldAbove { gold: u32 },
    /// An agent in the room has reputation below `reputation`.
    PatronReputationBelow { reputation: u8 },
    Chance { probability: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Speak a line of dialogue about `situation`; `{target}` is substituted.
    Dialogue { situation: String },
    /// Emote one of `lines`, chosen at random.
    Gesture { lines: Vec<String> },
    /// Emote `template` with `{target}` substituted.
    GestureAt { template: String },
}

/// Read-only snapshot an NPC decides from.
#[derive(Clone, Copy, Debug)]
pub struct NpcView<'a> {
    pub npc: &'a Character,
    /// Living agents sharing the NPC's room.
    pub patrons: &'a [Character],
    /// Recent events visible from the NPC's room, oldest first.
    pub recent: &'a [Event],
    pub tick: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    /// Needs a dialogue line before it becomes a `say` action.
    Speak {
        situation: String,
        target: Option<String>,
    },
    Act(ActionRequest),
}

impl Intent {
    pub fn into_request(self, line: Option<String>) -> ActionRequest {
        match self {
            Intent::Act(request) => request,
            Intent::Speak { .. } => ActionRequest::new(
                "say",
                Params {
                    text: Some(line.unwrap_or_else(|| "...".to_string())),
                    ..Params::default()
                },
            ),
        }
    }
}

/// Decide whether, and how, an NPC acts this tick.
///
/// `act_chance` gates the whole decision; when it passes the policy's rules
/// are tried in order.
pub fn decide<R: Rng + ?Sized>(
    policy: &NpcPolicy,
    act_chance: f64,
    view: &NpcView<'_>,
    rng: &mut R,
) -> Option<Intent> {
    if rng.gen::<f64>() >= act_chance {
        return None;
    }
    policy.rules.iter().find_map(|rule| {
        let target = trigger_target(&rule.when, view, rng)?;
        respond(&rule.then, target, rng)
    })
}

/// `Some(target)` when the trigger fires.
fn trigger_target<R: Rng + ?Sized>(
    trigger: &Trigger,
    view: &NpcView<'_>,
    rng: &mut R,
) -> Option<Option<String>> {
    match trigger {
        Trigger::RecentEvent {
            kinds,
            within_ticks,
        } => {
            let hit = view.recent.iter().find(|e| {
                kinds.contains(&e.kind)
                    && view.tick.saturating_sub(e.tick) <= *within_ticks
                    && e.actor.as_deref() != Some(view.npc.name.as_str())
            })?;
            Some(hit.actor.clone())
        }
        Trigger::PatronGoldAbove { gold } => {
            let rich: Vec<&Character> = view
                .patrons
                .iter()
                .filter(|c| c.gold > *gold && c.status == Status::Idle)
                .collect();
            rich.choose(rng).map(|c| Some(c.name.clone()))
        }
        Trigger::PatronReputationBelow { reputation } => view
            .patrons
            .iter()
            .find(|c| c.reputation < *reputation)
            .map(|c| Some(c.name.clone())),
        Trigger::Chance { probability } => {
            rng.gen_bool(probability.clamp(0.0, 1.0)).then_some(None)
        }
    }
}

fn respond<R: Rng + ?Sized>(
    response: &Response,
    target: Option<String>,
    rng: &mut R,
) -> Option<Intent> {
    let fill = |text: &str| match &target {
        Some(name) => text.replace("{target}", name),
        None => text.replace("{target}", "someone"),
    };
    match response {
        Response::Dialogue { situation } => Some(Intent::Speak {
            situation: fill(situation),
            target: target.clone(),
        }),
        Response::Gesture { lines } => lines.choose(rng).map(|line| emote(line.clone())),
        Response::GestureAt { template } => Some(emote(fill(template))),
    }
}

fn emote(text: String) -> Intent {
    Intent::Act(ActionRequest::new(
        "emote",
        Params {
            text: Some(text),
            ..Params::default()
        },
    ))
}
