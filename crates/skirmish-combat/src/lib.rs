//! Turn-based combat for Skirmish.
//!
//! - [`TurnManager`]: initiative order, current turn, rounds, combat
//!   groups, delayed actions and the turn timer.
//! - [`CombatCoordinator`]: the player-facing operations (start combat,
//!   attack, end turn, queue action, move) on top of a [`World`].
//!
//! The coordinator never learns who a session belongs to; callers resolve
//! the acting entity first and pass it in.

mod coordinator;
mod error;
pub mod initiative;
mod turn;
mod world;

pub use coordinator::{CombatConfig, CombatCoordinator};
pub use error::{CombatError, TurnError, ValidationError, WorldError};
pub use initiative::InitiativeRoll;
pub use turn::{
    ActionRequest, CombatGroups, DelayedAction, Removal, TurnAdvance, TurnConfig, TurnManager,
    TurnNotice, TurnNotices, TurnSnapshot, TurnUpdate, validate_groups, validate_initiative,
};
pub use world::{ActionOutcome, AttackOutcome, EffectTick, EventSink, World};
