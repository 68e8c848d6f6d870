//! Error types for the combat layer.

use skirmish_protocol::EntityId;

/// A proposed turn-order change was rejected. Nothing was modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("initiative is empty")]
    EmptyInitiative,

    #[error("initiative contains an empty entity id")]
    EmptyId,

    #[error("entity {0} appears more than once in the initiative")]
    DuplicateId(EntityId),

    /// A combat group names an entity that is not fighting.
    #[error("entity {0} is not in the initiative")]
    UnknownEntity(EntityId),

    #[error("entity {0} belongs to more than one combat group")]
    MultipleGroups(EntityId),

    #[error("turn index {index} out of bounds for {len} combatants")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("round must be at least 1 during combat")]
    ZeroRound,

    #[error("turn timeout must be non-zero")]
    ZeroTimeout,
}

/// Errors returned by [`TurnManager`](crate::TurnManager).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not in combat")]
    NotInCombat,

    #[error("not actor's turn")]
    NotActorsTurn,

    #[error("combat already in progress")]
    AlreadyInCombat,
}

/// Failures reported by the [`World`](crate::World) collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    /// The world refused the action (out of range, blocked tile, ...).
    #[error("action rejected: {0}")]
    Rejected(String),
}

/// Errors returned by [`CombatCoordinator`](crate::CombatCoordinator).
///
/// The `Display` strings of the ordering errors are part of the wire
/// contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CombatError {
    #[error("not in combat")]
    NotInCombat,

    #[error("not your turn")]
    NotYourTurn,

    #[error("combat already in progress")]
    AlreadyInCombat,

    #[error("target {0} is not in combat")]
    TargetNotInCombat(EntityId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    World(#[from] WorldError),
}

impl From<TurnError> for CombatError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Validation(e) => Self::Validation(e),
            TurnError::NotInCombat => Self::NotInCombat,
            TurnError::NotActorsTurn => Self::NotYourTurn,
            TurnError::AlreadyInCombat => Self::AlreadyInCombat,
        }
    }
}
