//! Collaborator interfaces: the game world and the event sink.
//!
//! The combat core never owns characters, items or rules. It asks a
//! [`World`] and reports what happened to an [`EventSink`].

use std::sync::Arc;

use skirmish_protocol::{EntityId, GameEvent, ItemId, Position};

use crate::{DelayedAction, WorldError};

/// Result of one attack (or one hit of an area effect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackOutcome {
    pub target: EntityId,
    pub hit: bool,
    pub damage: u32,
    pub remaining_hp: i32,
    /// The hit reduced the target to zero.
    pub killed: bool,
}

/// Result of ticking an entity's status effects at the end of its turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectTick {
    /// Damage taken from effects (poison, burning, ...).
    pub damage: u32,
    /// Effects that ran out.
    pub expired: Vec<String>,
    pub killed: bool,
}

/// Result of executing a delayed action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub hits: Vec<AttackOutcome>,
}

/// Game-state lookups and mutations the combat core depends on.
///
/// Implementations hold their own synchronization and must not call back
/// into the combat core. Methods may be called while the turn lock is held.
pub trait World: Send + Sync + 'static {
    fn exists(&self, id: &EntityId) -> bool;

    /// Dexterity score, if the entity has one.
    fn dexterity(&self, id: &EntityId) -> Option<i32>;

    fn is_alive(&self, id: &EntityId) -> bool;

    /// Entities the given one fights alongside.
    fn allies(&self, id: &EntityId) -> Vec<EntityId>;

    fn position(&self, id: &EntityId) -> Option<Position>;

    /// Names of status effects currently on the entity.
    fn active_effects(&self, id: &EntityId) -> Vec<String>;

    fn resolve_attack(
        &self,
        attacker: &EntityId,
        target: &EntityId,
        weapon: Option<&ItemId>,
    ) -> Result<AttackOutcome, WorldError>;

    /// Removes and returns everything the entity carried.
    fn drop_inventory(&self, id: &EntityId) -> Vec<ItemId>;

    fn tick_effects(&self, id: &EntityId) -> EffectTick;

    fn execute_delayed(&self, action: &DelayedAction) -> Result<ActionOutcome, WorldError>;

    fn move_entity(&self, id: &EntityId, to: Position) -> Result<(), WorldError>;
}

/// Where combat events go. Implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: GameEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: GameEvent) {
        (**self).emit(event);
    }
}
