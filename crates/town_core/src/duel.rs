//! The duel state machine.
//!
//! `pending -> accepted -> in_progress -> resolved`, with two shortcuts to
//! `resolved`: a decline and an unanswered challenge. Statuses only move
//! forward, and resolving an already resolved duel is a no-op.

use rand::Rng;
use serde_json::json;
use tracing::{info, warn};

use crate::action::{ActionOutcome, Effect, Handled, Params};
use crate::combat::resolve_duel_round;
use crate::distribute::Reach;
use crate::engine::Engine;
use crate::error::{ErrorCode, Rejection};
use crate::event::{Event, EventInput, EventKind};
use crate::fixed::{
    commit_delta, DECLINE_DUEL_PENALTY, DUEL_ACCEPT_TIMEOUT_TICKS, DUEL_PREP_TICKS,
    FATAL_DUEL_BONUS, MAX_REPUTATION, MAX_WANTED_LEVEL, WIN_DUEL_BONUS,
};
use crate::store::{Result, Store};
use crate::world::{Character, Duel, DuelId, DuelStatus, Status};

/// What a duel sweep did this tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuelSweep {
    pub resolved: usize,
    pub expired: usize,
    pub failures: usize,
}

impl<S: Store> Engine<S> {
    pub(crate) async fn challenge(
        &mut self,
        actor: &Character,
        params: &Params,
        tick: u64,
    ) -> Handled {
        let room = self.room_of(actor)?;
        if room.is_safe_zone {
            return Err(Rejection::forbidden("No duels here. Take it outside.").into());
        }
        let target = self.present_target(actor, params.target.as_deref())?;
        if target.id == actor.id {
            return Err(Rejection::new(ErrorCode::InvalidParams, "You can't duel yourself.").into());
        }
        if target.is_npc || target.is_protected {
            return Err(Rejection::forbidden(format!(
                "{} has no interest in your quarrel.",
                target.name
            ))
            .into());
        }
        if target.status == Status::InDuel {
            return Err(Rejection::forbidden(format!("{} is already facing someone.", target.name)).into());
        }
        if self.store.active_duel_involving(actor.id).is_some() {
            return Err(Rejection::forbidden("You already have a duel hanging over you.").into());
        }
        if self.store.active_duel_involving(target.id).is_some() {
            return Err(Rejection::forbidden(format!(
                "{} already has a duel hanging over them.",
                target.name
            ))
            .into());
        }

        let duel = self.store.create_duel(actor.id, target.id, tick);
        let narrative = self
            .narrate(
                actor,
                &room.id,
                tick,
                "challenge",
                format!("challenges {} to a duel", target.name),
                vec![target.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::DuelChallenge, tick, &narrative)
                .in_room(&room.id)
                .by(&actor.name)
                .action("challenge")
                .data(json!({
                    "duel_id": duel.id,
                    "challenger": actor.name,
                    "challenged": target.name,
                    "phase": "pending",
                })),
            Reach::RoomAndGlobal,
        );
        info!(duel = %duel.id, challenger = %actor.name, challenged = %target.name, tick, "duel challenged");
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::DuelInitiated {
                target: target.name,
            }],
        ))
    }

    pub(crate) async fn accept(&mut self, actor: &Character, tick: u64) -> Handled {
        let duel = self
            .store
            .pending_duel_for(actor.id)
            .ok_or_else(|| Rejection::forbidden("Nobody has challenged you."))?;
        let challenger = match self.store.character(duel.challenger) {
            Some(c) if c.is_alive() && c.status != Status::Dying => c,
            _ => {
                self.store.update_duel(duel.id, |d| {
                    d.advance(DuelStatus::Resolved);
                    d.resolved_at = Some(tick);
                })?;
                return Err(Rejection::forbidden("There is no one left to face.").into());
            }
        };

        let arena = self.town.duel_room.clone();
        let duel = self.store.update_duel(duel.id, |d| {
            d.advance(DuelStatus::Accepted);
            d.accepted_at = Some(tick);
            d.resolve_at = Some(tick + DUEL_PREP_TICKS);
        })?;
        for id in [duel.challenger, duel.challenged] {
            self.store.update_character(id, |c| {
                c.current_room = arena.clone();
                c.status = Status::InDuel;
            })?;
        }

        let narrative = self
            .narrate(
                actor,
                &arena,
                tick,
                "accept",
                format!("accepts {}'s challenge", challenger.name),
                vec![challenger.name.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::DuelChallenge, tick, &narrative)
                .in_room(&arena)
                .by(&actor.name)
                .action("accept")
                .data(json!({
                    "duel_id": duel.id,
                    "challenger": challenger.name,
                    "challenged": actor.name,
                    "phase": "accepted",
                    "resolve_at": duel.resolve_at,
                })),
            Reach::RoomAndGlobal,
        );
        info!(duel = %duel.id, tick, "duel accepted");
        Ok(ActionOutcome::ok(
            narrative,
            vec![
                Effect::DuelAccepted,
                Effect::Room {
                    new_value: arena,
                },
            ],
        ))
    }

    pub(crate) async fn decline(&mut self, actor: &Character, tick: u64) -> Handled {
        let duel = self
            .store
            .pending_duel_for(actor.id)
            .ok_or_else(|| Rejection::forbidden("Nobody has challenged you."))?;
        self.store.update_duel(duel.id, |d| {
            d.advance(DuelStatus::Resolved);
            d.resolved_at = Some(tick);
        })?;
        let decliner = self.store.update_character(actor.id, |c| {
            c.reputation = commit_delta(
                c.reputation,
                -i32::from(DECLINE_DUEL_PENALTY),
                MAX_REPUTATION,
            );
            c.status = Status::Idle;
        })?;
        let challenger = self
            .store
            .character(duel.challenger)
            .map(|c| c.name)
            .unwrap_or_default();

        let room = decliner.current_room.clone();
        let narrative = self
            .narrate(
                &decliner,
                &room,
                tick,
                "decline",
                format!("backs down from {challenger}'s challenge"),
                vec![challenger.clone()],
            )
            .await;
        self.emit(
            EventInput::new(EventKind::DuelResult, tick, &narrative)
                .in_room(&room)
                .by(&actor.name)
                .action("decline")
                .data(json!({
                    "duel_id": duel.id,
                    "challenger": challenger,
                    "challenged": actor.name,
                    "declined": true,
                    "reputation_lost": DECLINE_DUEL_PENALTY,
                })),
            Reach::Room,
        );
        Ok(ActionOutcome::ok(
            narrative,
            vec![Effect::Reputation {
                change: -i32::from(DECLINE_DUEL_PENALTY),
            }],
        ))
    }

    /// Fire the exchange for an accepted duel.
    ///
    /// Returns the `duel_result` event, or `None` when the duel is unknown or
    /// already resolved.
    pub async fn resolve_duel<R: Rng + Send + ?Sized>(
        &mut self,
        id: DuelId,
        tick: u64,
        rng: &mut R,
    ) -> Result<Option<Event>> {
        let Some(duel) = self.store.duel(id) else {
            return Ok(None);
        };
        if duel.status == DuelStatus::Resolved {
            return Ok(None);
        }
        let standing = |c: &Option<Character>| {
            c.as_ref()
                .filter(|c| c.is_alive() && c.status != Status::Dying)
                .cloned()
        };
        let challenger = self.store.character(duel.challenger);
        let challenged = self.store.character(duel.challenged);
        let (Some(a), Some(b)) = (standing(&challenger), standing(&challenged)) else {
            return self.call_off(&duel, tick).map(Some);
        };

        self.store.update_duel(id, |d| {
            d.advance(DuelStatus::InProgress);
            d.round += 1;
        })?;

        let round = resolve_duel_round(&a, &b, rng);
        let (first, second) = if round.first_shooter == a.id {
            (a, b)
        } else {
            (b, a)
        };
        let second = self
            .store
            .update_character(second.id, |c| {
                c.take_damage(round.first_damage, tick);
            })?;
        let first = if second.health > 0 {
            self.store.update_character(first.id, |c| {
                c.take_damage(round.second_damage, tick);
            })?
        } else {
            first
        };

        let (winner, loser, fatal) = match (first.health > 0, second.health > 0) {
            (true, false) => (Some(&first), Some(&second), true),
            (false, true) => (Some(&second), Some(&first), true),
            (true, true) => (Some(&first), Some(&second), false),
            (false, false) => (None, None, true),
        };

        if let Some(winner) = winner {
            let bonus = if fatal { FATAL_DUEL_BONUS } else { WIN_DUEL_BONUS };
            self.store.update_character(winner.id, |c| {
                c.reputation = commit_delta(c.reputation, i32::from(bonus), MAX_REPUTATION);
                if fatal {
                    c.wanted_level = commit_delta(c.wanted_level, 1, MAX_WANTED_LEVEL);
                }
            })?;
        }
        for survivor in [&first, &second] {
            if survivor.health > 0 {
                self.store.update_character(survivor.id, |c| {
                    if c.status == Status::InDuel {
                        c.status = Status::Idle;
                    }
                })?;
            }
        }
        let winner_id = winner.map(|w| w.id);
        self.store.update_duel(id, |d| {
            d.advance(DuelStatus::Resolved);
            d.resolved_at = Some(tick);
            d.winner = winner_id;
        })?;

        let outcome = match (winner, fatal) {
            (Some(w), true) => format!("{} stands over the body.", w.name),
            (Some(w), false) => format!("Both still stand, but {} had the faster hand.", w.name),
            (None, _) => "Both duelists fall in the dust.".to_string(),
        };
        let arena = self.town.duel_room.clone();
        let narrative = self
            .narrate(
                &first,
                &arena,
                tick,
                "duel_result",
                format!("{}. {}", round.narrative_input, outcome),
                vec![second.name.clone()],
            )
            .await;
        let event = self.emit(
            EventInput::new(EventKind::DuelResult, tick, &narrative)
                .in_room(&arena)
                .by(&first.name)
                .action("duel")
                .data(json!({
                    "duel_id": id,
                    "first_shooter": first.name,
                    "second_shooter": second.name,
                    "first_damage": round.first_damage,
                    "second_damage": if second.health > 0 { round.second_damage } else { 0 },
                    "winner": winner.map(|w| w.name.clone()),
                    "loser": loser.map(|l| l.name.clone()),
                    "fatal": fatal,
                })),
            Reach::RoomAndGlobal,
        );
        info!(duel = %id, winner = ?winner.map(|w| &w.name), fatal, tick, "duel resolved");
        Ok(Some(event))
    }

    /// Resolve due duels and expire unanswered challenges.
    pub async fn sweep_duels<R: Rng + Send + ?Sized>(&mut self, tick: u64, rng: &mut R) -> DuelSweep {
        let mut sweep = DuelSweep::default();
        for duel in self.store.active_duels() {
            match duel.status {
                DuelStatus::Pending
                    if tick.saturating_sub(duel.challenged_at) > DUEL_ACCEPT_TIMEOUT_TICKS =>
                {
                    match self.expire_duel(&duel, tick) {
                        Ok(_) => sweep.expired += 1,
                        Err(err) => {
                            warn!(duel = %duel.id, error = %err, "failed to expire duel");
                            sweep.failures += 1;
                        }
                    }
                }
                DuelStatus::Accepted | DuelStatus::InProgress
                    if duel.resolve_at.map_or(true, |at| at <= tick) =>
                {
                    match self.resolve_duel(duel.id, tick, rng).await {
                        Ok(_) => sweep.resolved += 1,
                        Err(err) => {
                            warn!(duel = %duel.id, error = %err, "failed to resolve duel");
                            sweep.failures += 1;
                        }
                    }
                }
                _ => {}
            }
        }
        sweep
    }

    fn expire_duel(&mut self, duel: &Duel, tick: u64) -> Result<Event> {
        self.store.update_duel(duel.id, |d| {
            d.advance(DuelStatus::Resolved);
            d.resolved_at = Some(tick);
        })?;
        let challenger = self.store.character(duel.challenger);
        let name = challenger
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Someone".to_string());
        if challenger.as_ref().is_some_and(Character::is_alive) {
            self.store.update_character(duel.challenger, |c| {
                c.reputation = commit_delta(
                    c.reputation,
                    -i32::from(DECLINE_DUEL_PENALTY),
                    MAX_REPUTATION,
                );
            })?;
        }
        let challenged = self
            .store
            .character(duel.challenged)
            .map(|c| c.name)
            .unwrap_or_default();
        info!(duel = %duel.id, tick, "duel challenge expired");
        Ok(self.emit(
            EventInput::new(
                EventKind::WorldAnnouncement,
                tick,
                format!("{name}'s duel challenge expires unanswered."),
            )
            .data(json!({
                "duel_id": duel.id,
                "challenger": name,
                "challenged": challenged,
                "reputation_lost": DECLINE_DUEL_PENALTY,
            })),
            Reach::Global,
        ))
    }

    /// Resolve a duel that lost a participant before the shooting started.
    fn call_off(&mut self, duel: &Duel, tick: u64) -> Result<Event> {
        self.store.update_duel(duel.id, |d| {
            d.advance(DuelStatus::Resolved);
            d.resolved_at = Some(tick);
        })?;
        let mut names = Vec::new();
        for id in [duel.challenger, duel.challenged] {
            let Some(character) = self.store.character(id) else {
                continue;
            };
            if character.status == Status::InDuel {
                self.store
                    .update_character(id, |c| c.status = Status::Idle)?;
            }
            names.push(character.name);
        }
        let arena = self.town.duel_room.clone();
        Ok(self.emit(
            EventInput::new(
                EventKind::DuelResult,
                tick,
                format!("The duel between {} never comes to pass.", names.join(" and ")),
            )
            .in_room(&arena)
            .action("duel")
            .data(json!({ "duel_id": duel.id, "called_off": true })),
            Reach::RoomAndGlobal,
        ))
    }
}
