//! The action processor.
//!
//! [`Engine::process`] validates one queued request against the actor's state,
//! dispatches it to a handler and commits the result. A refused action is an
//! ordinary outcome carrying an [`ErrorCode`]; only store faults surface as
//! errors.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::debug;

use crate::combat::{deduct_ammo, has_ammo, resolve_punch, resolve_shooting};
use crate::distribute::Reach;
use crate::engine::{require, Engine};
use crate::error::{ErrorCode, Rejection};
use crate::event::{EventInput, EventKind};
use crate::fixed::{
    commit_delta, HEAL_AMOUNT, HEAL_REPUTATION_BONUS, MAX_HEALTH, MAX_INTOXICATION,
    MAX_REPUTATION, MAX_WANTED_LEVEL,
};
use crate::store::{Store, StoreError};
use crate::world::{Character, CharacterId, Role, RoomId, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Say,
    Whisper,
    Emote,
    Look,
    Move,
    Shoot,
    Punch,
    Challenge,
    Accept,
    Decline,
    Buy,
    Give,
    Pay,
    Heal,
    Wait,
    Sleep,
}

impl ActionKind {
    /// Parse an action name, accepting the long-form aliases clients use.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_lowercase().as_str() {
            "say" | "speak" => ActionKind::Say,
            "whisper" => ActionKind::Whisper,
            "emote" | "gesture" => ActionKind::Emote,
            "look" | "inspect" => ActionKind::Look,
            "move" => ActionKind::Move,
            "shoot" => ActionKind::Shoot,
            "punch" => ActionKind::Punch,
            "challenge" => ActionKind::Challenge,
            "accept" => ActionKind::Accept,
            "decline" => ActionKind::Decline,
            "buy" | "purchase" => ActionKind::Buy,
            "give" | "transfer_item" => ActionKind::Give,
            "pay" | "transfer_gold" => ActionKind::Pay,
            "heal" => ActionKind::Heal,
            "wait" => ActionKind::Wait,
            "sleep" => ActionKind::Sleep,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Say => "say",
            ActionKind::Whisper => "whisper",
            ActionKind::Emote => "emote",
            ActionKind::Look => "look",
            ActionKind::Move => "move",
            ActionKind::Shoot => "shoot",
            ActionKind::Punch => "punch",
            ActionKind::Challenge => "challenge",
            ActionKind::Accept => "accept",
            ActionKind::Decline => "decline",
            ActionKind::Buy => "buy",
            ActionKind::Give => "give",
            ActionKind::Pay => "pay",
            ActionKind::Heal => "heal",
            ActionKind::Wait => "wait",
            ActionKind::Sleep => "sleep",
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub text: Option<String>,
    pub target: Option<String>,
    pub room: Option<String>,
    pub item: Option<String>,
    pub amount: Option<u32>,
}

/// An action as submitted by an agent or chosen by an NPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

impl ActionRequest {
    pub fn new(action: &str, params: Params) -> Self {
        Self {
            action: action.to_string(),
            params,
        }
    }
}

/// A state change reported back to the actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Room { new_value: RoomId },
    Ammo { change: i32 },
    Wanted { change: i32, new_value: u8 },
    Damage { target: String, change: u32 },
    DuelInitiated { target: String },
    DuelAccepted,
    Reputation { change: i32 },
    Gold { change: i64, new_value: u32 },
    Intoxication { change: i32, new_value: u8 },
    Inventory { change: i32, target: String },
    Heal { target: String, change: u8, new_value: u8 },
    Status { new_value: Status },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub narrative: String,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ActionOutcome {
    pub fn ok(narrative: impl Into<String>, effects: Vec<Effect>) -> Self {
        Self {
            success: true,
            narrative: narrative.into(),
            effects,
            error_code: None,
        }
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            success: false,
            narrative: rejection.narrative,
            effects: Vec::new(),
            error_code: Some(rejection.code),
        }
    }
}

/// Why a handler stopped early.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) type Handled = Result<ActionOutcome, ActionError>;

/// The state gate every action passes before dispatch.
fn admit(actor: &Character, kind: Option<ActionKind>) -> Result<ActionKind, Rejection> {
    let waiting = kind == Some(ActionKind::Wait);
    match actor.status {
        Status::Dead => {
            return Err(Rejection::new(
                ErrorCode::CharacterDead,
                "The dead do not act.",
            ))
        }
        Status::Dying if !waiting => {
            return Err(Rejection::forbidden(
                "You are bleeding out. All you can do is wait for a doctor.",
            ))
        }
        Status::InDuel if !waiting => {
            return Err(Rejection::new(
                ErrorCode::InDuel,
                "Your hand hovers over your holster. The duel comes first.",
            ))
        }
        _ => {}
    }
    kind.ok_or_else(|| Rejection::new(ErrorCode::InvalidAction, "That is not something you can do here."))
}

impl<S: Store> Engine<S> {
    /// Run one action for `actor` at `tick`.
    pub async fn process<R: Rng + Send + ?Sized>(
        &mut self,
        actor: CharacterId,
        request: &ActionRequest,
        tick: u64,
        rng: &mut R,
    ) -> anyhow::Result<ActionOutcome> {
        let Some(mut character) = self.store.character(actor) else {
            return Ok(ActionOutcome::rejected(Rejection::new(
                ErrorCode::TargetNotFound,
                "No such character.",
            )));
        };
        let kind = match admit(&character, ActionKind::parse(&request.action)) {
            Ok(kind) => kind,
            Err(rejection) => {
                debug!(actor = %character.name, action = %request.action, code = %rejection.code, "action refused");
                return Ok(ActionOutcome::rejected(rejection));
            }
        };

        if character.status == Status::Sleeping
            && !matches!(kind, ActionKind::Sleep | ActionKind::Wait)
        {
            character = self
                .store
                .update_character(actor, |c| c.status = Status::Idle)?;
        }

        let params = &request.params;
        let handled = match kind {
            ActionKind::Say => self.say(&character, params, tick).await,
            ActionKind::Whisper => self.whisper(&character, params, tick).await,
            ActionKind::Emote => self.emote(&character, params, tick).await,
            ActionKind::Look => self.look(&character, params, tick).await,
            ActionKind::Move => self.walk(&character, params, tick).await,
            ActionKind::Shoot => self.shoot(&character, params, tick, rng).await,
            ActionKind::Punch => self.punch(&character, params, tick, rng).await,
            ActionKind::Challenge => self.challenge(&character, params, tick).await,
            ActionKind::Accept => self.accept(&character, tick).await,
            ActionKind::Decline => self.decline(&character, tick).await,
            ActionKind::Buy => self.buy(&character, params, tick).await,
            ActionKind::Give => self.give(&character, params, tick).await,
            ActionKind::Pay => self.pay(&character, params, tick).await,
            ActionKind::Heal => self.heal(&character, params, tick).await,
            ActionKind::Wait => self.wait(&character, tick).await,
            ActionKind::Sleep => self.sleep(&character, tick).await,
        };

        let outcome = match handled {
            Ok(outcome) => outcome,
            Err(ActionError::Rejected(rejection)) => {
                debug!(actor = %character.name, action = kind.as_str(), code = %rejection.code, "action refused");
                return Ok(ActionOutcome::rejected(rejection));
            }
            Err(ActionError::Store(err)) => return Err(err.into()),
        };

        match self
            .store
            .update_character(actor, |c| c.last_action_tick = Some(tick))
        {
            Ok(_) | Err(StoreError::Dead(_)) => {}
            Err(err) => return Err(err.into()),
        }
        debug!(actor = %character.name, action = kind.as_str(), tick, "action applied");
        Ok(outcome)
    }

    async fn say(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let text = require(params.text.as_deref(), "text")?;
        let room = actor.current_room.clone();
        let others = self.others_in(&room, actor);
        let narrative = self.narrate(actor, &room, tick, "say", text, others).await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("say")
                .data(json!({ "text": text })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(narrative, Vec::new()))
    }

    async fn whisper(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let target = self.present_target(actor, params.target.as_deref())?;
        require(params.text.as_deref(), "text")?;
        let room = actor.current_room.clone();
        let detail = format!("whispers something to {}", target.name);
        let narrative = self
            .narrate(actor, &room, tick, "whisper", detail, vec![target.name.clone()])
            .await;
        // Bystanders see the whisper happen, never its words.
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("whisper")
                .data(json!({ "target": target.name })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(narrative, Vec::new()))
    }

    async fn emote(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let text = require(params.text.as_deref(), "text")?;
        let room = actor.current_room.clone();
        let others = self.others_in(&room, actor);
        let narrative = self.narrate(actor, &room, tick, "emote", text, others).await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("emote")
                .data(json!({ "text": text })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(narrative, Vec::new()))
    }

    async fn look(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let room = self.room_of(actor)?;
        let details = match params.target.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(name) => match self.present_target(actor, Some(name)) {
                Ok(target) => describe_character(&target),
                Err(_) => format!("You don't see {name} here."),
            },
            None => {
                let others = self.others_in(&room.id, actor);
                let company = if others.is_empty() {
                    "Nobody else is here.".to_string()
                } else {
                    format!("Present: {}.", others.join(", "))
                };
                let exits: Vec<&str> = room.exits.iter().map(RoomId::as_str).collect();
                format!(
                    "{}: {} {} Exits: {}.",
                    room.name,
                    room.description,
                    company,
                    exits.join(", ")
                )
            }
        };
        let narrative = self
            .narrate(actor, &room.id, tick, "look", "looks around", Vec::new())
            .await;
        Ok(ActionOutcome::ok(format!("{narrative} {details}"), Vec::new()))
    }

    async fn walk(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let destination = RoomId::new(require(params.room.as_deref(), "room")?);
        let here = self.room_of(actor)?;
        let there = match self.store.room(&destination) {
            Some(room) if here.has_exit(&destination) => room,
            _ => {
                return Err(Rejection::forbidden(format!(
                    "You can't get to {destination} from here."
                ))
                .into())
            }
        };

        self.emit(
            EventInput::new(
                EventKind::Leave,
                tick,
                format!("{} heads toward {}.", actor.name, there.name),
            )
            .in_room(&here.id)
            .by(&actor.name)
            .action("move")
            .data(json!({ "to": there.id })),
            Reach::Room,
        );

        let moved = self
            .store
            .update_character(actor.id, |c| c.current_room = there.id.clone())?;

        let others = self.others_in(&there.id, &moved);
        let narrative = self
            .narrate(
                &moved,
                &there.id,
                tick,
                "move",
                format!("walks in from {}", here.name),
                others,
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Enter, tick, &narrative)
                .in_room(&there.id)
                .by(&actor.name)
                .action("move")
                .data(json!({ "from": here.id })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::Room {
                new_value: there.id,
            }],
        ))
    }

    async fn shoot<R: Rng + Send + ?Sized>(
        &mut self,
        actor: &Character,
        params: &Params,
        tick: u64,
        rng: &mut R,
    ) -> Handled {
        let room = self.room_of(actor)?;
        if room.is_safe_zone {
            return Err(Rejection::forbidden("Violence isn't tolerated here.").into());
        }
        if !has_ammo(&actor.inventory) {
            return Err(Rejection::forbidden("Click. Empty.").into());
        }
        let target = self.present_target(actor, params.target.as_deref())?;
        if target.id == actor.id {
            return Err(Rejection::new(ErrorCode::InvalidParams, "You can't shoot yourself.").into());
        }
        if target.is_protected {
            return Err(Rejection::forbidden(format!(
                "Something stays your hand. {} is not to be harmed.",
                target.name
            ))
            .into());
        }

        let spent = deduct_ammo(&actor.inventory);
        let round_spent = spent != actor.inventory;
        let shooter = self.store.update_character(actor.id, |c| {
            c.inventory = spent;
            c.wanted_level = commit_delta(c.wanted_level, 1, MAX_WANTED_LEVEL);
        })?;
        let strike = resolve_shooting(&shooter, &target, rng);
        if strike.hit {
            self.store
                .update_character(target.id, |c| {
                    c.take_damage(strike.damage, tick);
                })?;
        }

        let narrative = self
            .narrate(
                &shooter,
                &room.id,
                tick,
                "shoot",
                strike.narrative_input.clone(),
                vec![target.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Combat, tick, &narrative)
                .in_room(&room.id)
                .by(&actor.name)
                .action("shoot")
                .data(json!({
                    "target": target.name,
                    "weapon": "gun",
                    "hit": strike.hit,
                    "damage": strike.damage,
                })),
            Reach::Room,
        );

        let mut effects = Vec::new();
        // Uncounted ammo tokens like "ammo belt" load the gun without being used up.
        if round_spent {
            effects.push(Effect::Ammo { change: -1 });
        }
        effects.push(Effect::Wanted {
            change: 1,
            new_value: shooter.wanted_level,
        });
        if strike.hit {
            effects.push(Effect::Damage {
                target: target.name,
                change: strike.damage,
            });
        }
        Ok(ActionOutcome::ok(narrative, effects))
    }

    async fn punch<R: Rng + Send + ?Sized>(
        &mut self,
        actor: &Character,
        params: &Params,
        tick: u64,
        rng: &mut R,
    ) -> Handled {
        let room = self.room_of(actor)?;
        if room.is_safe_zone {
            return Err(Rejection::forbidden("Violence isn't tolerated here.").into());
        }
        let target = self.present_target(actor, params.target.as_deref())?;
        if target.id == actor.id {
            return Err(Rejection::new(ErrorCode::InvalidParams, "You can't punch yourself.").into());
        }
        if target.is_protected {
            return Err(Rejection::forbidden(format!(
                "Something stays your hand. {} is not to be harmed.",
                target.name
            ))
            .into());
        }

        let strike = resolve_punch(actor, &target, rng);
        if strike.hit {
            self.store
                .update_character(target.id, |c| {
                    c.take_damage(strike.damage, tick);
                })?;
        }

        let narrative = self
            .narrate(
                actor,
                &room.id,
                tick,
                "punch",
                strike.narrative_input.clone(),
                vec![target.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Combat, tick, &narrative)
                .in_room(&room.id)
                .by(&actor.name)
                .action("punch")
                .data(json!({
                    "target": target.name,
                    "weapon": "fists",
                    "hit": strike.hit,
                    "damage": strike.damage,
                })),
            Reach::Room,
        );

        let effects = if strike.hit {
            vec![Effect::Damage {
                target: target.name,
                change: strike.damage,
            }]
        } else {
            Vec::new()
        };
        Ok(ActionOutcome::ok(narrative, effects))
    }

    async fn buy(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let room = self.room_of(actor)?;
        if !room.sells_drinks {
            return Err(Rejection::forbidden("Nobody is selling anything here.").into());
        }
        let item = require(params.item.as_deref(), "item")?;
        let Some(drink) = self.town.drink(item).cloned() else {
            return Err(Rejection::new(
                ErrorCode::InvalidParams,
                format!("There's no {item} on the menu."),
            )
            .into());
        };
        if actor.gold < drink.price {
            return Err(Rejection::forbidden(format!(
                "{} costs {} gold. You can't cover it.",
                drink.name, drink.price
            ))
            .into());
        }

        let buyer = self.store.update_character(actor.id, |c| {
            c.gold -= drink.price;
            c.intoxication =
                commit_delta(c.intoxication, i32::from(drink.intoxication), MAX_INTOXICATION);
        })?;
        let others = self.others_in(&room.id, actor);
        let narrative = self
            .narrate(
                &buyer,
                &room.id,
                tick,
                "buy",
                format!("buys a {} and knocks it back", drink.name),
                others,
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room.id)
                .by(&actor.name)
                .action("buy")
                .data(json!({ "item": drink.name, "price": drink.price })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![
                Effect::Gold {
                    change: -i64::from(drink.price),
                    new_value: buyer.gold,
                },
                Effect::Intoxication {
                    change: i32::from(buyer.intoxication) - i32::from(actor.intoxication),
                    new_value: buyer.intoxication,
                },
            ],
        ))
    }

    async fn give(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let target = self.present_target(actor, params.target.as_deref())?;
        if target.id == actor.id {
            return Err(Rejection::new(ErrorCode::InvalidParams, "You already have it.").into());
        }
        let item = require(params.item.as_deref(), "item")?;
        let wanted = item.to_lowercase();
        let Some(index) = actor
            .inventory
            .iter()
            .position(|i| i.to_lowercase() == wanted)
        else {
            return Err(Rejection::new(
                ErrorCode::InvalidParams,
                format!("You don't have {item}."),
            )
            .into());
        };
        let token = actor.inventory[index].clone();

        self.store.update_character(actor.id, |c| {
            c.inventory.remove(index);
        })?;
        self.store
            .update_character(target.id, |c| c.inventory.push(token.clone()))?;

        let room = actor.current_room.clone();
        let narrative = self
            .narrate(
                actor,
                &room,
                tick,
                "give",
                format!("hands {} to {}", token, target.name),
                vec![target.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("give")
                .data(json!({ "target": target.name, "item": token })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::Inventory {
                change: -1,
                target: target.name,
            }],
        ))
    }

    async fn pay(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        let target = self.present_target(actor, params.target.as_deref())?;
        if target.id == actor.id {
            return Err(Rejection::new(ErrorCode::InvalidParams, "You can't pay yourself.").into());
        }
        let amount = match params.amount {
            Some(amount) if amount > 0 => amount,
            _ => {
                return Err(Rejection::new(
                    ErrorCode::InvalidParams,
                    "Name a positive amount of gold.",
                )
                .into())
            }
        };
        if actor.gold < amount {
            return Err(Rejection::forbidden(format!(
                "You only have {} gold.",
                actor.gold
            ))
            .into());
        }

        let payer = self
            .store
            .update_character(actor.id, |c| c.gold -= amount)?;
        self.store
            .update_character(target.id, |c| c.gold = c.gold.saturating_add(amount))?;

        let room = actor.current_room.clone();
        let narrative = self
            .narrate(
                &payer,
                &room,
                tick,
                "pay",
                format!("pays {} {} gold", target.name, amount),
                vec![target.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("pay")
                .data(json!({ "target": target.name, "amount": amount })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::Gold {
                change: -i64::from(amount),
                new_value: payer.gold,
            }],
        ))
    }

    async fn heal(&mut self, actor: &Character, params: &Params, tick: u64) -> Handled {
        if actor.role != Role::Doctor {
            return Err(Rejection::forbidden("You don't know the first thing about medicine.").into());
        }
        let target = self.present_target(actor, params.target.as_deref())?;
        let was_dying = target.status == Status::Dying;

        let patient = self.store.update_character(target.id, |c| {
            c.health = commit_delta(c.health, i32::from(HEAL_AMOUNT), MAX_HEALTH);
            if c.status == Status::Dying {
                c.status = Status::Idle;
                c.dying_since = None;
            }
        })?;
        let doctor = self.store.update_character(actor.id, |c| {
            c.reputation = commit_delta(c.reputation, i32::from(HEAL_REPUTATION_BONUS), MAX_REPUTATION);
        })?;

        let detail = if was_dying {
            format!("pulls {} back from the brink", target.name)
        } else {
            format!("patches up {}", target.name)
        };
        let room = actor.current_room.clone();
        let narrative = self
            .narrate(&doctor, &room, tick, "heal", detail, vec![target.name.clone()])
            .await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("heal")
                .data(json!({
                    "target": target.name,
                    "amount": HEAL_AMOUNT,
                    "revived": was_dying,
                })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![
                Effect::Heal {
                    target: target.name,
                    change: patient.health - target.health,
                    new_value: patient.health,
                },
                Effect::Reputation {
                    change: i32::from(HEAL_REPUTATION_BONUS),
                },
            ],
        ))
    }

    async fn wait(&mut self, actor: &Character, tick: u64) -> Handled {
        let room = actor.current_room.clone();
        let narrative = self
            .narrate(actor, &room, tick, "wait", "waits and watches", Vec::new())
            .await;
        Ok(ActionOutcome::ok(narrative, Vec::new()))
    }

    async fn sleep(&mut self, actor: &Character, tick: u64) -> Handled {
        self.store
            .update_character(actor.id, |c| c.status = Status::Sleeping)?;
        let room = actor.current_room.clone();
        let narrative = self
            .narrate(actor, &room, tick, "sleep", "settles in to rest", Vec::new())
            .await;
        self.emit(
            EventInput::new(EventKind::Action, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("sleep"),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::Status {
                new_value: Status::Sleeping,
            }],
        ))
    }
}

fn describe_character(target: &Character) -> String {
    let condition = match target.health {
        0 => "bleeding out on the floor",
        1..=30 => "badly hurt",
        31..=70 => "a little worse for wear",
        _ => "in good health",
    };
    let mut details = format!("{}, a {:?}, looks {}.", target.name, target.role, condition);
    if target.intoxication >= 5 {
        details.push_str(" They sway on their feet.");
    }
    if target.status == Status::Sleeping {
        details.push_str(" They are fast asleep.");
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_kinds() {
        assert_eq!(ActionKind::parse("speak"), Some(ActionKind::Say));
        assert_eq!(ActionKind::parse("Gesture"), Some(ActionKind::Emote));
        assert_eq!(ActionKind::parse("transfer_gold"), Some(ActionKind::Pay));
        assert_eq!(ActionKind::parse("transfer_item"), Some(ActionKind::Give));
        assert_eq!(ActionKind::parse("purchase"), Some(ActionKind::Buy));
        assert_eq!(ActionKind::parse("inspect"), Some(ActionKind::Look));
        assert_eq!(ActionKind::parse("dance"), None);
    }

    #[test]
    fn requests_parse_without_params() {
        let request: ActionRequest = serde_json::from_str(r#"{"action": "wait"}"#).expect("parses");
        assert_eq!(request, ActionRequest::new("wait", Params::default()));
    }

    #[test]
    fn effects_are_tagged_by_type() {
        let value = serde_json::to_value(Effect::Wanted {
            change: 1,
            new_value: 3,
        })
        .expect("serializes");
        assert_eq!(value, json!({"type": "wanted", "change": 1, "new_value": 3}));
    }

    #[test]
    fn rejected_outcome_carries_code() {
        let outcome = ActionOutcome::rejected(Rejection::not_here("Bo"));
        assert!(!outcome.success);
        assert_eq!(outcome.error_code, Some(ErrorCode::TargetNotFound));
        let value = serde_json::to_value(&outcome).expect("serializes");
        assert_eq!(value["error_code"], "TARGET_NOT_FOUND");
    }

    #[test]
    fn state_gate_orders_dead_dying_duel_then_kind() {
        let mut character = Character::new(
            CharacterId(1),
            "Ada",
            Role::Stranger,
            crate::world::Stats::new(5, 5, 5, 5),
            RoomId::new("street"),
        );
        assert_eq!(admit(&character, None).map_err(|r| r.code), Err(ErrorCode::InvalidAction));

        character.status = Status::InDuel;
        assert_eq!(
            admit(&character, None).map_err(|r| r.code),
            Err(ErrorCode::InDuel)
        );
        assert_eq!(admit(&character, Some(ActionKind::Wait)), Ok(ActionKind::Wait));

        character.status = Status::Dying;
        assert_eq!(
            admit(&character, Some(ActionKind::Say)).map_err(|r| r.code),
            Err(ErrorCode::ActionForbidden)
        );
        assert_eq!(admit(&character, Some(ActionKind::Wait)), Ok(ActionKind::Wait));

        character.status = Status::Dead;
        assert_eq!(
            admit(&character, Some(ActionKind::Wait)).map_err(|r| r.code),
            Err(ErrorCode::CharacterDead)
        );
    }
}
