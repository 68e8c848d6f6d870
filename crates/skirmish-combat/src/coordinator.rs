//! The combat coordinator: player-facing combat operations on top of the
//! [`TurnManager`] and the [`World`].
//!
//! Every operation that changes the world on behalf of an actor does so
//! inside a turn-ownership check held under the turn lock, so an action
//! can never land on someone else's turn. Events go to the [`EventSink`]
//! after the fact.
//!
//! Operations are not cancel-safe past the point where the world changed:
//! a kill is followed by removal from the initiative and the combat-end
//! check in later lock acquisitions. Callers that bound a request in time
//! run the operation in its own task and stop waiting instead of dropping
//! the future.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use skirmish_clock::{GameClock, TriggerTime};
use skirmish_protocol::{CombatSnapshot, EntityId, EventKind, GameEvent, ItemId, Position};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::initiative::{InitiativeRoll, roll_initiative, turn_order};
use crate::turn::{CombatGroups, Removal, TurnNotices, validate_initiative};
use crate::{
    ActionRequest, AttackOutcome, CombatError, DelayedAction, EventSink, TurnAdvance,
    TurnConfig, TurnManager, TurnNotice, World, WorldError,
};

/// Configuration for the coordinator and its turn manager.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatConfig {
    pub turn: TurnConfig,
    /// A successful attack also ends the attacker's turn.
    ///
    /// Default: `true`.
    pub end_turn_on_attack: bool,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            end_turn_on_attack: true,
        }
    }
}

impl CombatConfig {
    pub fn validated(mut self) -> Self {
        self.turn = self.turn.validated();
        self
    }
}

/// How a turn came to an end.
#[derive(Debug, Clone, Copy)]
enum TurnEnding {
    Explicit,
    TimedOut { reordered: bool },
}

/// Runs combats between world entities.
pub struct CombatCoordinator<W: World> {
    turns: TurnManager,
    world: Arc<W>,
    events: Arc<dyn EventSink>,
    config: CombatConfig,
    rng: Mutex<StdRng>,
}

impl<W: World> CombatCoordinator<W> {
    /// Creates a coordinator and the notice stream its turn timer feeds.
    /// Pass the stream to [`run_notices`](Self::run_notices).
    pub fn new(
        world: Arc<W>,
        events: Arc<dyn EventSink>,
        config: CombatConfig,
        clock: GameClock,
    ) -> (Self, TurnNotices) {
        let config = config.validated();
        let (turns, notices) = TurnManager::new(config.turn.clone(), clock);
        let coordinator = Self {
            turns,
            world,
            events,
            config,
            rng: Mutex::new(StdRng::from_os_rng()),
        };
        (coordinator, notices)
    }

    /// Replaces the initiative RNG, for reproducible rolls.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn turns(&self) -> &TurnManager {
        &self.turns
    }

    pub fn world(&self) -> &Arc<W> {
        &self.world
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Rolls initiative for `participants` and starts a combat. Returns the
    /// rolls in turn order.
    pub async fn start_combat(
        &self,
        participants: Vec<EntityId>,
    ) -> Result<Vec<InitiativeRoll>, CombatError> {
        if self.turns.in_combat().await {
            return Err(CombatError::AlreadyInCombat);
        }
        validate_initiative(&participants)?;
        if let Some(missing) = participants.iter().find(|p| !self.world.exists(p)) {
            return Err(WorldError::EntityNotFound(missing.clone()).into());
        }

        let stats: Vec<_> = participants
            .iter()
            .map(|p| (p.clone(), self.world.dexterity(p)))
            .collect();
        let rolls = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            roll_initiative(&mut *rng, &stats)
        };
        let order = turn_order(&rolls);

        let first = self.turns.start_combat(order.clone()).await?;
        let groups = self.ally_groups(&order);
        let sides = groups.len();
        if let Err(e) = self.turns.set_combat_groups(groups).await {
            warn!(error = %e, "combat groups not applied");
        }

        info!(combatants = order.len(), sides, %first, "combat begins");
        self.emit(
            GameEvent::new(EventKind::CombatStart, participants[0].clone())
                .with_data("initiative", json!(order))
                .with_data("round", 1),
        );
        self.emit_turn_start(&first, 1);
        Ok(rolls)
    }

    /// `actor` attacks `target`.
    ///
    /// Fails with "not in combat" or "not your turn" without touching the
    /// world. A kill drops the target's inventory, removes it from the
    /// initiative and may end the combat.
    pub async fn attack(
        &self,
        actor: &EntityId,
        target: &EntityId,
        weapon: Option<&ItemId>,
    ) -> Result<AttackOutcome, CombatError> {
        let outcome = self
            .turns
            .act_as(actor, |initiative| {
                if !initiative.contains(target) {
                    return Err(CombatError::TargetNotInCombat(target.clone()));
                }
                self.world
                    .resolve_attack(actor, target, weapon)
                    .map_err(CombatError::from)
            })
            .await??;

        let mut event = damage_event(actor, &outcome);
        if let Some(weapon) = weapon {
            event = event.with_data("weapon_id", weapon.to_string());
        }
        self.emit(event);
        debug!(%actor, %target, damage = outcome.damage, killed = outcome.killed, "attack resolved");

        if outcome.killed {
            self.handle_death(target, Some(actor)).await;
        }

        if self.config.end_turn_on_attack && self.turns.in_combat().await {
            match self.end_turn(actor).await {
                Ok(_) => {}
                Err(CombatError::NotInCombat | CombatError::NotYourTurn) => {
                    debug!(%actor, "turn already over after attack");
                }
                Err(e) => warn!(%actor, error = %e, "could not end turn after attack"),
            }
        }
        Ok(outcome)
    }

    /// Ends `actor`'s turn, ticks its status effects and, when the round
    /// wrapped, runs due delayed actions and checks for combat end.
    pub async fn end_turn(&self, actor: &EntityId) -> Result<TurnAdvance, CombatError> {
        let advance = self.turns.end_turn_for(actor).await?;
        self.after_turn(&advance, Vec::new(), TurnEnding::Explicit).await;
        Ok(advance)
    }

    /// Schedules a delayed action for `actor`.
    pub async fn queue_action(
        &self,
        actor: &EntityId,
        request: ActionRequest,
    ) -> Result<TriggerTime, CombatError> {
        Ok(self.turns.queue_action(actor, request).await?)
    }

    /// Moves `actor`. During combat only on its own turn.
    pub async fn move_to(&self, actor: &EntityId, to: Position) -> Result<(), CombatError> {
        self.turns
            .act_if_allowed(actor, || self.world.move_entity(actor, to))
            .await??;
        self.emit(
            GameEvent::new(EventKind::Movement, actor.clone())
                .with_data("x", to.x)
                .with_data("y", to.y),
        );
        Ok(())
    }

    /// Ends the combat when the living combatants form at most one group.
    /// Returns the rounds completed if this call ended it.
    pub async fn check_combat_end(&self) -> Option<u32> {
        let mut survivors = Vec::new();
        let mut winner = None;
        let rounds = self
            .turns
            .end_combat_if(|initiative, groups| {
                survivors = initiative
                    .iter()
                    .filter(|id| self.world.is_alive(id))
                    .cloned()
                    .collect();
                let sides: BTreeSet<&EntityId> =
                    survivors.iter().map(|id| side_of(groups, id)).collect();
                winner = sides.first().map(|s| (*s).clone());
                sides.len() <= 1
            })
            .await?;

        let source = survivors
            .first()
            .cloned()
            .or(winner.clone())
            .unwrap_or_else(|| EntityId::new("world"));
        let mut event = GameEvent::new(EventKind::CombatEnd, source)
            .with_data("rounds_completed", rounds)
            .with_data("survivors", json!(survivors));
        if let Some(winner) = winner {
            event = event.with_data("winner_group", winner.to_string());
        }
        self.emit(event);
        info!(rounds_completed = rounds, survivors = survivors.len(), "combat over");
        Some(rounds)
    }

    /// A derived view of the running combat; empty when idle.
    pub async fn combat_state(&self) -> CombatSnapshot {
        let snapshot = self.turns.snapshot().await;
        if !snapshot.in_combat {
            return CombatSnapshot::default();
        }

        let effects = snapshot
            .initiative
            .iter()
            .filter_map(|id| {
                let active = self.world.active_effects(id);
                (!active.is_empty()).then(|| (id.clone(), active))
            })
            .collect();
        let positions: Vec<Position> = snapshot
            .initiative
            .iter()
            .filter_map(|id| self.world.position(id))
            .collect();

        CombatSnapshot {
            in_combat: true,
            zone: centroid(&positions),
            combatants: snapshot.initiative,
            current: snapshot.current,
            round: snapshot.round,
            effects,
        }
    }

    // -----------------------------------------------------------------------
    // Timer notices
    // -----------------------------------------------------------------------

    /// Finishes a turn the timer ended.
    pub async fn handle_notice(&self, notice: TurnNotice) {
        match notice {
            TurnNotice::TimedOut {
                actor,
                reordered,
                due,
                advance,
            } => {
                debug!(%actor, reordered, "handling turn timeout");
                self.after_turn(&advance, due, TurnEnding::TimedOut { reordered })
                    .await;
            }
        }
    }

    /// Processes notices until the stream closes or `shutdown` turns `true`.
    pub async fn run_notices(
        &self,
        mut notices: TurnNotices,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                notice = notices.recv() => match notice {
                    Some(notice) => self.handle_notice(notice).await,
                    None => break,
                },
            }
        }
        info!("turn notice processor stopped");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn after_turn(&self, advance: &TurnAdvance, mut due: Vec<DelayedAction>, ending: TurnEnding) {
        let previous = &advance.previous;
        let mut event = GameEvent::new(EventKind::TurnEnd, previous.clone())
            .with_data("round", advance.round);
        if let TurnEnding::TimedOut { reordered } = ending {
            event = event
                .with_data("timed_out", true)
                .with_data("reordered", reordered);
        }
        self.emit(event);

        if self.world.is_alive(previous) {
            let tick = self.world.tick_effects(previous);
            if tick.damage > 0 || !tick.expired.is_empty() {
                debug!(
                    actor = %previous,
                    damage = tick.damage,
                    expired = ?tick.expired,
                    "status effects ticked"
                );
            }
            if tick.damage > 0 {
                self.emit(
                    GameEvent::new(EventKind::Damage, previous.clone())
                        .with_target(previous.clone())
                        .with_data("damage", tick.damage)
                        .with_data("source", "effects"),
                );
            }
            if tick.killed {
                self.handle_death(previous, None).await;
            }
        }

        if advance.wrapped {
            due.extend(self.turns.take_due_actions().await);
        }
        for action in due {
            self.execute_action(action).await;
        }
        if advance.wrapped {
            self.check_combat_end().await;
        }

        let now = self.turns.snapshot().await;
        if let Some(current) = now.current {
            self.emit_turn_start(&current, now.round);
        }
    }

    async fn execute_action(&self, action: DelayedAction) {
        let outcome = match self.world.execute_delayed(&action) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    actor = %action.actor,
                    action = %action.action_type,
                    error = %e,
                    "delayed action failed"
                );
                return;
            }
        };

        let mut event = GameEvent::new(EventKind::Spellcast, action.actor.clone())
            .with_data("action_type", action.action_type.as_str())
            .with_data("parameters", json!(action.parameters));
        if let Some(pos) = action.target_position {
            event = event.with_data("target_position", json!({ "x": pos.x, "y": pos.y }));
        }
        self.emit(event);

        for hit in &outcome.hits {
            self.emit(damage_event(&action.actor, hit));
        }
        for hit in outcome.hits.iter().filter(|h| h.killed) {
            self.handle_death(&hit.target, Some(&action.actor)).await;
        }
    }

    async fn handle_death(&self, id: &EntityId, killer: Option<&EntityId>) {
        let position = self.world.position(id);
        for item in self.world.drop_inventory(id) {
            let mut event = GameEvent::new(EventKind::ItemDrop, id.clone())
                .with_data("item_id", item.to_string());
            if let Some(pos) = position {
                event = event.with_data("position", json!({ "x": pos.x, "y": pos.y }));
            }
            self.emit(event);
        }

        let mut event = GameEvent::new(EventKind::Death, id.clone());
        if let Some(killer) = killer {
            event = event.with_data("killed_by", killer.to_string());
        }
        self.emit(event);
        info!(entity = %id, "combatant died");

        let removal = self.turns.remove_combatant(id).await;
        if let Removal::CombatEnded { rounds_completed } = removal {
            self.emit(
                GameEvent::new(EventKind::CombatEnd, id.clone())
                    .with_data("rounds_completed", rounds_completed)
                    .with_data("survivors", json!([])),
            );
            return;
        }
        if self.check_combat_end().await.is_some() {
            return;
        }
        if let Removal::RemovedCurrent(advance) = removal {
            self.emit_turn_start(&advance.next, advance.round);
        }
    }

    /// Connected components of the ally graph, restricted to `order`. Each
    /// group is labelled by its first member in turn order.
    fn ally_groups(&self, order: &[EntityId]) -> CombatGroups {
        let mut groups = CombatGroups::new();
        let mut assigned: HashSet<EntityId> = HashSet::new();

        for seed in order {
            if !assigned.insert(seed.clone()) {
                continue;
            }
            let mut members = Vec::new();
            let mut queue = VecDeque::from([seed.clone()]);
            while let Some(id) = queue.pop_front() {
                for ally in self.world.allies(&id) {
                    if order.contains(&ally) && assigned.insert(ally.clone()) {
                        queue.push_back(ally);
                    }
                }
                members.push(id);
            }
            members.sort_by_key(|m| order.iter().position(|o| o == m));
            groups.insert(seed.clone(), members);
        }
        groups
    }

    fn emit_turn_start(&self, actor: &EntityId, round: u32) {
        self.emit(GameEvent::new(EventKind::TurnStart, actor.clone()).with_data("round", round));
    }

    fn emit(&self, event: GameEvent) {
        self.events.emit(event);
    }
}

/// The group label of `id`, or `id` itself when ungrouped.
fn side_of<'a>(groups: &'a CombatGroups, id: &'a EntityId) -> &'a EntityId {
    groups
        .iter()
        .find(|(_, members)| members.contains(id))
        .map_or(id, |(label, _)| label)
}

fn damage_event(source: &EntityId, outcome: &AttackOutcome) -> GameEvent {
    GameEvent::new(EventKind::Damage, source.clone())
        .with_target(outcome.target.clone())
        .with_data("damage", outcome.damage)
        .with_data("hit", outcome.hit)
        .with_data("remaining_hp", outcome.remaining_hp)
}

/// Integer mean of `positions`, rounded toward negative infinity.
fn centroid(positions: &[Position]) -> Option<Position> {
    if positions.is_empty() {
        return None;
    }
    let n = positions.len() as i64;
    let (sx, sy) = positions
        .iter()
        .fold((0i64, 0i64), |(x, y), p| (x + p.x as i64, y + p.y as i64));
    Some(Position::new(sx.div_euclid(n) as i32, sy.div_euclid(n) as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_of_nothing_is_none() {
        assert_eq!(centroid(&[]), None);
    }

    #[test]
    fn test_centroid_rounds_down() {
        let zone = centroid(&[Position::new(0, 0), Position::new(3, -3)]);
        assert_eq!(zone, Some(Position::new(1, -2)));
    }

    #[test]
    fn test_side_of_ungrouped_entity_is_itself() {
        let groups = CombatGroups::new();
        let id = EntityId::new("loner");
        assert_eq!(side_of(&groups, &id), &id);
    }

    #[test]
    fn test_side_of_grouped_entity_is_label() {
        let groups = CombatGroups::from([(
            EntityId::new("knight"),
            vec![EntityId::new("knight"), EntityId::new("squire")],
        )]);
        assert_eq!(side_of(&groups, &EntityId::new("squire")).as_str(), "knight");
    }
}
