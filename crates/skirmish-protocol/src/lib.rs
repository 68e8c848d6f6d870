//! Wire protocol for Skirmish.
//!
//! - **Identifiers** ([`EntityId`], [`SessionId`], [`ItemId`]) shared by
//!   every layer.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]) exchanged over the
//!   realtime transport.
//! - **Events** ([`GameEvent`], [`EventKind`]) published by combat and
//!   fanned out to every connected session.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]).
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Session / Combat
//! ```

mod codec;
mod error;
mod event;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use event::{EventKind, GameEvent, unix_millis};
pub use types::{
    ClientMessage, CombatSnapshot, EntityId, ItemId, Position, ServerMessage,
    SessionId,
};
