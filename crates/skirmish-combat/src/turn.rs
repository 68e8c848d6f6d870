//! The turn manager: initiative order, the current-turn pointer, rounds,
//! combat groups, delayed actions and the turn timer.
//!
//! # State machine
//!
//! ```text
//!   Idle ──start_combat──→ InCombat ──end_combat──→ Idle
//!                           │    ▲
//!                           └────┘  advance / timeout / apply
//! ```
//!
//! All state lives behind one `tokio::sync::Mutex`. Explicit advances and
//! the timer callback both take it, so they are serialized. Every arm of
//! the timer bumps a turn epoch; a timer that fires after its turn already
//! ended sees a different epoch and does nothing.
//!
//! Every mutation validates first and commits second. A rejected command
//! leaves the state untouched.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use skirmish_clock::{GameClock, TriggerTime};
use skirmish_protocol::{EntityId, Position};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{TurnError, ValidationError};

/// Combat groups: group label → ordered allied entity ids.
pub type CombatGroups = BTreeMap<EntityId, Vec<EntityId>>;

/// Receiving end of the timeout notices published by a [`TurnManager`].
pub type TurnNotices = mpsc::UnboundedReceiver<TurnNotice>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the turn manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// How long an actor has before the turn ends on its own.
    ///
    /// Default: 30 seconds.
    pub turn_timeout: Duration,

    /// Whether an actor who times out without acting has its whole combat
    /// group moved to the front of the initiative.
    ///
    /// Default: `true`.
    pub reorder_on_timeout: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(30),
            reorder_on_timeout: true,
        }
    }
}

impl TurnConfig {
    pub const MIN_TURN_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn validated(mut self) -> Self {
        if self.turn_timeout < Self::MIN_TURN_TIMEOUT {
            warn!(
                timeout_ms = self.turn_timeout.as_millis() as u64,
                "turn_timeout too small, clamping"
            );
            self.turn_timeout = Self::MIN_TURN_TIMEOUT;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// What an actor asks to schedule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionRequest {
    pub action_type: String,
    pub target_position: Option<Position>,
    pub parameters: BTreeMap<String, Value>,
    /// Game ticks until the action is due. 0 means "due at the next check".
    pub delay_ticks: u64,
}

/// A scheduled effect, consumed once the game clock reaches its trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedAction {
    pub actor: EntityId,
    pub action_type: String,
    pub target_position: Option<Position>,
    pub trigger: TriggerTime,
    pub parameters: BTreeMap<String, Value>,
}

/// The result of moving the turn pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnAdvance {
    /// Whose turn just ended.
    pub previous: EntityId,
    /// Whose turn it is now.
    pub next: EntityId,
    /// The round after the advance.
    pub round: u32,
    /// `true` when the pointer wrapped and a new round began.
    pub wrapped: bool,
}

/// Published when a turn ends because its timer fired.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnNotice {
    TimedOut {
        actor: EntityId,
        /// The actor's group was moved to the front.
        reordered: bool,
        /// Delayed actions that became due, already removed from the queue.
        due: Vec<DelayedAction>,
        advance: TurnAdvance,
    },
}

/// Outcome of [`TurnManager::remove_combatant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The entity was not fighting.
    NotPresent,
    /// Removed; the current actor is unchanged.
    Removed,
    /// The current actor was removed; the turn passed on.
    RemovedCurrent(TurnAdvance),
    /// The last combatant was removed and combat ended.
    CombatEnded { rounds_completed: u32 },
}

/// Explicit runtime changes to turn state. Each is validated before it is
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    Round(u32),
    CurrentIndex(usize),
    /// Replace the order. The current actor keeps the turn if still present.
    Initiative(Vec<EntityId>),
    CombatGroups(CombatGroups),
    TurnTimeout(Duration),
}

/// A consistent copy of the turn state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnSnapshot {
    pub in_combat: bool,
    pub initiative: Vec<EntityId>,
    pub current_index: usize,
    pub current: Option<EntityId>,
    pub round: u32,
    pub combat_groups: CombatGroups,
    pub pending_actions: usize,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks that an initiative is non-empty with unique, non-blank ids.
pub fn validate_initiative(initiative: &[EntityId]) -> Result<(), ValidationError> {
    if initiative.is_empty() {
        return Err(ValidationError::EmptyInitiative);
    }
    let mut seen = HashSet::with_capacity(initiative.len());
    for id in initiative {
        if id.is_blank() {
            return Err(ValidationError::EmptyId);
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

/// Checks that every group member is in `initiative` and in one group only.
pub fn validate_groups(
    groups: &CombatGroups,
    initiative: &[EntityId],
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for member in groups.values().flatten() {
        if !initiative.contains(member) {
            return Err(ValidationError::UnknownEntity(member.clone()));
        }
        if !seen.insert(member) {
            return Err(ValidationError::MultipleGroups(member.clone()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Phase {
    Idle,
    InCombat(Combat),
}

#[derive(Debug)]
struct Combat {
    initiative: Vec<EntityId>,
    index: usize,
    round: u32,
    /// The current actor acted (attacked, queued, moved) this turn.
    acted: bool,
}

impl Combat {
    fn current(&self) -> Option<&EntityId> {
        self.initiative.get(self.index)
    }

    fn begin_turn(&mut self, index: usize, wrapped: bool) {
        self.index = index;
        if wrapped {
            self.round = self.round.saturating_add(1);
        }
        self.acted = false;
    }

    fn turn_advance(&self, previous: EntityId, wrapped: bool) -> TurnAdvance {
        TurnAdvance {
            previous,
            next: self.initiative[self.index].clone(),
            round: self.round,
            wrapped,
        }
    }

    /// Moves to the next actor. An out-of-bounds pointer wraps to 0.
    fn step(&mut self) -> TurnAdvance {
        let previous = self.current().cloned().unwrap_or_else(|| self.initiative[0].clone());
        let mut next = self.index.saturating_add(1);
        let wrapped = next >= self.initiative.len();
        if wrapped {
            next = 0;
        }
        self.begin_turn(next, wrapped);
        self.turn_advance(previous, wrapped)
    }

    /// Puts `group` (in group order) at the front, keeping everyone else in
    /// their old relative order. The turn passes to the first non-member
    /// after the old pointer; if there is none, a new round starts with the
    /// group.
    fn reorder_group_first(&mut self, group: &[EntityId]) -> Result<TurnAdvance, ValidationError> {
        let previous = self
            .current()
            .cloned()
            .ok_or(ValidationError::IndexOutOfBounds {
                index: self.index,
                len: self.initiative.len(),
            })?;

        let in_group = |id: &EntityId| group.contains(id);
        let mut order: Vec<EntityId> = group
            .iter()
            .filter(|m| self.initiative.contains(m))
            .cloned()
            .collect();
        order.extend(self.initiative.iter().filter(|id| !in_group(id)).cloned());
        validate_initiative(&order)?;

        let next_outside = self
            .initiative
            .iter()
            .skip(self.index + 1)
            .find(|id| !in_group(id));
        let (index, wrapped) = match next_outside {
            Some(id) => (order.iter().position(|o| o == id).unwrap_or(0), false),
            None => (0, true),
        };

        self.initiative = order;
        self.begin_turn(index, wrapped);
        Ok(self.turn_advance(previous, wrapped))
    }
}

enum TurnTimer {
    NoTimer,
    Armed { handle: JoinHandle<()>, epoch: u64 },
}

impl TurnTimer {
    fn is_armed_for(&self, epoch: u64) -> bool {
        matches!(self, Self::Armed { epoch: e, .. } if *e == epoch)
    }

    fn cancel(&mut self) {
        if let Self::Armed { handle, .. } = mem::replace(self, Self::NoTimer) {
            handle.abort();
        }
    }
}

impl fmt::Debug for TurnTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTimer => f.write_str("NoTimer"),
            Self::Armed { epoch, .. } => write!(f, "Armed(epoch {epoch})"),
        }
    }
}

#[derive(Debug)]
struct TurnState {
    phase: Phase,
    groups: CombatGroups,
    delayed: Vec<DelayedAction>,
    timer: TurnTimer,
    epoch: u64,
    config: TurnConfig,
}

impl TurnState {
    fn combat(&self) -> Option<&Combat> {
        match &self.phase {
            Phase::InCombat(c) => Some(c),
            Phase::Idle => None,
        }
    }

    fn combat_mut(&mut self) -> Result<&mut Combat, TurnError> {
        match &mut self.phase {
            Phase::InCombat(c) => Ok(c),
            Phase::Idle => Err(TurnError::NotInCombat),
        }
    }

    /// Ownership check shared by every actor-scoped operation.
    fn owned_turn(&mut self, actor: &EntityId) -> Result<&mut Combat, TurnError> {
        let combat = self.combat_mut()?;
        if combat.current() != Some(actor) {
            debug!(%actor, current = ?combat.current(), "rejected: not actor's turn");
            return Err(TurnError::NotActorsTurn);
        }
        Ok(combat)
    }

    /// The group containing `id`, or `id` alone.
    fn group_of(&self, id: &EntityId) -> Vec<EntityId> {
        self.groups
            .values()
            .find(|members| members.contains(id))
            .cloned()
            .unwrap_or_else(|| vec![id.clone()])
    }

    fn take_due(&mut self, clock: &GameClock) -> Vec<DelayedAction> {
        let (due, pending): (Vec<_>, Vec<_>) = mem::take(&mut self.delayed)
            .into_iter()
            .partition(|a| clock.is_due(&a.trigger));
        self.delayed = pending;

        let fighting = self
            .combat()
            .map(|c| c.initiative.as_slice())
            .unwrap_or_default();
        due.into_iter()
            .filter(|action| {
                let keep = fighting.contains(&action.actor);
                if !keep {
                    debug!(
                        actor = %action.actor,
                        action = %action.action_type,
                        "discarding delayed action of departed actor"
                    );
                }
                keep
            })
            .collect()
    }

    /// Clears all combat state. Returns the final round if combat was on.
    fn finish(&mut self) -> Option<u32> {
        self.timer.cancel();
        let rounds = self.combat().map(|c| c.round);
        self.phase = Phase::Idle;
        self.groups.clear();
        let dropped = self.delayed.len();
        self.delayed.clear();
        if dropped > 0 {
            debug!(dropped, "pending delayed actions cleared at combat end");
        }
        rounds
    }
}

// ---------------------------------------------------------------------------
// TurnManager
// ---------------------------------------------------------------------------

struct Shared {
    state: Mutex<TurnState>,
    clock: GameClock,
    notices: mpsc::UnboundedSender<TurnNotice>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.state.get_mut().timer.cancel();
    }
}

/// Turn order and timers for one combat at a time.
///
/// Cheap to clone; clones share state. The timer task only holds a weak
/// reference, so dropping the last handle stops it.
#[derive(Clone)]
pub struct TurnManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for TurnManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnManager").finish_non_exhaustive()
    }
}

impl TurnManager {
    /// Creates an idle manager and the receiver for its timeout notices.
    pub fn new(config: TurnConfig, clock: GameClock) -> (Self, TurnNotices) {
        let (notices, rx) = mpsc::unbounded_channel();
        let state = TurnState {
            phase: Phase::Idle,
            groups: CombatGroups::new(),
            delayed: Vec::new(),
            timer: TurnTimer::NoTimer,
            epoch: 0,
            config: config.validated(),
        };
        let manager = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                clock,
                notices,
            }),
        };
        (manager, rx)
    }

    pub fn clock(&self) -> &GameClock {
        &self.shared.clock
    }

    // -- lifecycle -------------------------------------------------------

    /// Enters combat with `initiative` as the turn order. Returns the first
    /// actor.
    pub async fn start_combat(&self, initiative: Vec<EntityId>) -> Result<EntityId, TurnError> {
        validate_initiative(&initiative)?;

        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        if state.combat().is_some() {
            return Err(TurnError::AlreadyInCombat);
        }

        let first = initiative[0].clone();
        let combatants = initiative.len();
        state.groups.clear();
        state.delayed.clear();
        state.phase = Phase::InCombat(Combat {
            initiative,
            index: 0,
            round: 1,
            acted: false,
        });
        self.arm_timer(state);

        info!(%first, combatants, "combat started");
        Ok(first)
    }

    /// Leaves combat. Returns the round combat ended in, or `None` if it
    /// was not running. Safe to call repeatedly.
    pub async fn end_combat(&self) -> Option<u32> {
        let rounds = self.shared.state.lock().await.finish();
        if let Some(round) = rounds {
            info!(round, "combat ended");
        }
        rounds
    }

    /// Ends combat if `decide` returns `true` for the current initiative
    /// and groups. Deciding and ending happen under one lock acquisition,
    /// so concurrent callers end a combat at most once.
    pub async fn end_combat_if(
        &self,
        decide: impl FnOnce(&[EntityId], &CombatGroups) -> bool,
    ) -> Option<u32> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let combat = state.combat()?;
        if !decide(&combat.initiative, &state.groups) {
            return None;
        }
        let rounds = state.finish();
        drop(guard);
        if let Some(round) = rounds {
            info!(round, "combat ended");
        }
        rounds
    }

    // -- queries ---------------------------------------------------------

    /// `true` only during combat and only for the current actor.
    pub async fn is_current_turn(&self, id: &EntityId) -> bool {
        let state = self.shared.state.lock().await;
        state.combat().and_then(Combat::current) == Some(id)
    }

    pub async fn current_actor(&self) -> Option<EntityId> {
        let state = self.shared.state.lock().await;
        state.combat().and_then(Combat::current).cloned()
    }

    /// The current round, or 0 outside combat.
    pub async fn round(&self) -> u32 {
        let state = self.shared.state.lock().await;
        state.combat().map_or(0, |c| c.round)
    }

    pub async fn in_combat(&self) -> bool {
        self.shared.state.lock().await.combat().is_some()
    }

    pub async fn snapshot(&self) -> TurnSnapshot {
        let state = self.shared.state.lock().await;
        match state.combat() {
            Some(c) => TurnSnapshot {
                in_combat: true,
                initiative: c.initiative.clone(),
                current_index: c.index,
                current: c.current().cloned(),
                round: c.round,
                combat_groups: state.groups.clone(),
                pending_actions: state.delayed.len(),
            },
            None => TurnSnapshot::default(),
        }
    }

    // -- turn progression ------------------------------------------------

    /// Passes the turn to the next actor regardless of who holds it.
    /// `None` outside combat.
    pub async fn advance_turn(&self) -> Option<TurnAdvance> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let advance = state.combat_mut().ok()?.step();
        self.arm_timer(state);
        log_advance(&advance, "turn advanced");
        Some(advance)
    }

    /// Ends `actor`'s turn if it holds it. The check and the advance happen
    /// under one lock acquisition.
    pub async fn end_turn_for(&self, actor: &EntityId) -> Result<TurnAdvance, TurnError> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let advance = state.owned_turn(actor)?.step();
        self.arm_timer(state);
        log_advance(&advance, "turn ended");
        Ok(advance)
    }

    /// Runs `f` while `actor` provably holds the turn, and marks the actor
    /// as having acted. `f` receives the current initiative.
    ///
    /// The turn lock is held while `f` runs: `f` must not call back into
    /// this manager.
    pub async fn act_as<R>(
        &self,
        actor: &EntityId,
        f: impl FnOnce(&[EntityId]) -> R,
    ) -> Result<R, TurnError> {
        let mut guard = self.shared.state.lock().await;
        let combat = guard.owned_turn(actor)?;
        combat.acted = true;
        Ok(f(&combat.initiative))
    }

    /// Runs `f` freely outside combat; during combat only while `actor`
    /// holds the turn (which then counts as acting).
    pub async fn act_if_allowed<R>(
        &self,
        actor: &EntityId,
        f: impl FnOnce() -> R,
    ) -> Result<R, TurnError> {
        let mut guard = self.shared.state.lock().await;
        if guard.combat().is_some() {
            guard.owned_turn(actor)?.acted = true;
        }
        Ok(f())
    }

    /// Schedules an action for `actor`, who must hold the turn.
    pub async fn queue_action(
        &self,
        actor: &EntityId,
        request: ActionRequest,
    ) -> Result<TriggerTime, TurnError> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.owned_turn(actor)?.acted = true;

        let trigger = self.shared.clock.trigger_in(request.delay_ticks);
        debug!(
            %actor,
            action = %request.action_type,
            tick = trigger.tick,
            "delayed action queued"
        );
        state.delayed.push(DelayedAction {
            actor: actor.clone(),
            action_type: request.action_type,
            target_position: request.target_position,
            trigger,
            parameters: request.parameters,
        });
        Ok(trigger)
    }

    /// Removes and returns every delayed action that is due.
    pub async fn take_due_actions(&self) -> Vec<DelayedAction> {
        let mut state = self.shared.state.lock().await;
        state.take_due(&self.shared.clock)
    }

    // -- membership ------------------------------------------------------

    /// Drops a dead or fled entity from the initiative and its group.
    pub async fn remove_combatant(&self, id: &EntityId) -> Removal {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let Ok(combat) = state.combat_mut() else {
            return Removal::NotPresent;
        };
        let Some(pos) = combat.initiative.iter().position(|e| e == id) else {
            return Removal::NotPresent;
        };

        if combat.initiative.len() == 1 {
            let rounds_completed = state.finish().unwrap_or(0);
            info!(%id, rounds_completed, "last combatant removed, combat ended");
            return Removal::CombatEnded { rounds_completed };
        }

        combat.initiative.remove(pos);
        let removal = if pos < combat.index {
            combat.index -= 1;
            Removal::Removed
        } else if pos == combat.index {
            let wrapped = pos >= combat.initiative.len();
            combat.begin_turn(if wrapped { 0 } else { pos }, wrapped);
            Removal::RemovedCurrent(combat.turn_advance(id.clone(), wrapped))
        } else {
            Removal::Removed
        };

        for members in state.groups.values_mut() {
            members.retain(|m| m != id);
        }
        state.groups.retain(|_, members| !members.is_empty());

        if let Removal::RemovedCurrent(advance) = &removal {
            self.arm_timer(state);
            log_advance(advance, "current actor removed");
        } else {
            debug!(%id, "combatant removed");
        }
        removal
    }

    /// Replaces the combat groups. Every member must be fighting and may
    /// appear in one group only.
    pub async fn set_combat_groups(&self, groups: CombatGroups) -> Result<(), TurnError> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let combat = state.combat_mut()?;
        validate_groups(&groups, &combat.initiative)?;
        state.groups = groups;
        Ok(())
    }

    /// Applies an explicit turn-state update.
    pub async fn apply(&self, update: TurnUpdate) -> Result<(), TurnError> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;

        match update {
            TurnUpdate::TurnTimeout(timeout) => {
                if timeout.is_zero() {
                    return Err(ValidationError::ZeroTimeout.into());
                }
                state.config.turn_timeout = timeout;
                if state.combat().is_some() {
                    self.arm_timer(state);
                }
            }
            TurnUpdate::Round(round) => {
                let combat = state.combat_mut()?;
                if round == 0 {
                    return Err(ValidationError::ZeroRound.into());
                }
                combat.round = round;
            }
            TurnUpdate::CurrentIndex(index) => {
                let combat = state.combat_mut()?;
                let len = combat.initiative.len();
                if index >= len {
                    return Err(ValidationError::IndexOutOfBounds { index, len }.into());
                }
                combat.begin_turn(index, false);
                self.arm_timer(state);
            }
            TurnUpdate::Initiative(initiative) => {
                validate_initiative(&initiative)?;
                let combat = state.combat_mut()?;
                let current = combat.current().cloned();
                let index = current
                    .and_then(|c| initiative.iter().position(|e| *e == c))
                    .unwrap_or(0);
                let actor_changed = combat.initiative.get(combat.index) != initiative.get(index);
                combat.initiative = initiative;
                if actor_changed {
                    combat.begin_turn(index, false);
                } else {
                    combat.index = index;
                }

                let fighting = combat.initiative.clone();
                for members in state.groups.values_mut() {
                    members.retain(|m| fighting.contains(m));
                }
                state.groups.retain(|_, members| !members.is_empty());
                if actor_changed {
                    self.arm_timer(state);
                }
            }
            TurnUpdate::CombatGroups(groups) => {
                let combat = state.combat_mut()?;
                validate_groups(&groups, &combat.initiative)?;
                state.groups = groups;
            }
        }
        Ok(())
    }

    // -- timer -----------------------------------------------------------

    /// Starts a fresh timer for the current turn, cancelling any previous one.
    fn arm_timer(&self, state: &mut TurnState) {
        state.timer.cancel();
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;
        let timeout = state.config.turn_timeout;
        let weak = Arc::downgrade(&self.shared);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                TurnManager { shared }.on_timeout(epoch).await;
            }
        });
        state.timer = TurnTimer::Armed { handle, epoch };
    }

    async fn on_timeout(&self, epoch: u64) {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        if !state.timer.is_armed_for(epoch) {
            debug!(epoch, "stale turn timer ignored");
            return;
        }
        // This task is the timer; drop the handle without aborting it.
        state.timer = TurnTimer::NoTimer;

        let reorder = state.config.reorder_on_timeout;
        let (actor, acted) = match state.combat() {
            Some(c) => match c.current() {
                Some(actor) => (actor.clone(), c.acted),
                None => {
                    error!(index = c.index, "turn pointer out of bounds at timeout");
                    (c.initiative[0].clone(), true)
                }
            },
            None => return,
        };
        let group = state.group_of(&actor);

        let mut reordered = false;
        let due = state.take_due(&self.shared.clock);
        let advance = match state.combat_mut() {
            Ok(combat) if reorder && !acted => match combat.reorder_group_first(&group) {
                Ok(advance) => {
                    reordered = true;
                    advance
                }
                Err(e) => {
                    error!(%actor, error = %e, "timeout reorder rejected, advancing normally");
                    combat.step()
                }
            },
            Ok(combat) => combat.step(),
            Err(_) => return,
        };
        self.arm_timer(state);
        drop(guard);

        info!(
            %actor,
            next = %advance.next,
            round = advance.round,
            reordered,
            due = due.len(),
            "turn timed out"
        );
        let notice = TurnNotice::TimedOut {
            actor,
            reordered,
            due,
            advance,
        };
        if self.shared.notices.send(notice).is_err() {
            debug!("no listener for turn notices");
        }
    }
}

fn log_advance(advance: &TurnAdvance, message: &'static str) {
    debug!(
        previous = %advance.previous,
        next = %advance.next,
        round = advance.round,
        wrapped = advance.wrapped,
        "{message}"
    );
}
