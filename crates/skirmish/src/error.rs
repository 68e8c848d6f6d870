//! Unified error type for the Skirmish server.

use std::time::Duration;

use skirmish_combat::{CombatError, TurnError, ValidationError, WorldError};
use skirmish_protocol::ProtocolError;
use skirmish_session::{SendError, SessionError};
use skirmish_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically. [`code`](Self::code) maps
/// each error onto the HTTP-style status sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum SkirmishError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session in a request is unknown or expired.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A message could not be queued for a session.
    #[error(transparent)]
    Send(#[from] SendError),

    /// A turn-order rule was violated.
    #[error(transparent)]
    Turn(#[from] TurnError),

    /// A combat operation was rejected.
    #[error(transparent)]
    Combat(#[from] CombatError),

    /// Malformed input to the turn manager.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The world refused an operation.
    #[error(transparent)]
    World(#[from] WorldError),

    /// The request did not finish within the per-request deadline.
    #[error("request exceeded its {}ms deadline", .0.as_millis())]
    DeadlineExceeded(Duration),

    /// The task running a request panicked or was aborted.
    #[error("request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SkirmishError {
    /// HTTP-style status code for the wire.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(ProtocolError::Encode(_)) => 500,
            Self::Protocol(_) | Self::Validation(_) => 400,
            Self::Transport(_) | Self::Send(_) | Self::Task(_) => 500,
            Self::Session(SessionError::NotFound(_)) => 404,
            Self::Turn(e) => turn_code(e),
            Self::Combat(e) => match e {
                CombatError::NotInCombat | CombatError::NotYourTurn => 403,
                CombatError::AlreadyInCombat => 409,
                CombatError::TargetNotInCombat(_) => 404,
                CombatError::Validation(_) => 400,
                CombatError::World(e) => world_code(e),
            },
            Self::World(e) => world_code(e),
            Self::DeadlineExceeded(_) => 408,
        }
    }

    /// `true` for rejections any client can provoke by sending a bad or
    /// badly timed request. These log at `debug`.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::DeadlineExceeded(_)) && self.code() < 500
    }
}

fn turn_code(e: &TurnError) -> u16 {
    match e {
        TurnError::Validation(_) => 400,
        TurnError::NotInCombat | TurnError::NotActorsTurn => 403,
        TurnError::AlreadyInCombat => 409,
    }
}

fn world_code(e: &WorldError) -> u16 {
    match e {
        WorldError::EntityNotFound(_) => 404,
        WorldError::Rejected(_) => 400,
    }
}
