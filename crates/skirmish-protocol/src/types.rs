//! Core protocol types: identifiers and the messages that travel on the wire.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::GameEvent;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a world entity: a player character, a monster, a summon.
///
/// Serialized as a plain string. An empty id is representable so that
/// malformed input can be decoded and then rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for the empty string (or whitespace only).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an item (weapon, loot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, unguessable session identifier.
///
/// `Display` only shows a short prefix so ids can go into logs without
/// leaking a usable credential. Use [`as_str`](Self::as_str) for the full
/// value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a raw id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the full id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "S-{prefix}")
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// A grid position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// Requests a client sends to the server.
///
/// Internally tagged by `method`:
/// `{ "method": "attack", "session_id": "…", "target_id": "goblin-1" }`.
///
/// Action requests carry the `session_id` issued in
/// [`ServerMessage::Welcome`]. The acting entity is always resolved from the
/// session, never taken from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a combat between the given participants.
    StartCombat {
        session_id: SessionId,
        participants: Vec<EntityId>,
    },

    /// Attack a target during the caller's turn.
    Attack {
        session_id: SessionId,
        target_id: EntityId,
        #[serde(default)]
        weapon_id: Option<ItemId>,
    },

    /// End the caller's turn.
    EndTurn { session_id: SessionId },

    /// Schedule an effect that resolves at a later game tick.
    QueueAction {
        session_id: SessionId,
        action_type: String,
        #[serde(default)]
        target_position: Option<Position>,
        #[serde(default)]
        parameters: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        delay_ticks: u64,
    },

    /// Move the caller's character. During combat only on the caller's turn.
    Move { session_id: SessionId, to: Position },

    /// Request a snapshot of the current combat.
    CombatState { session_id: SessionId },

    /// Keep-alive; the server echoes `client_time` back.
    Ping { client_time: u64 },

    /// The client is leaving.
    Disconnect {
        #[serde(default)]
        reason: String,
    },
}

impl ClientMessage {
    /// The wire name of this request, used in acknowledgements and logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::StartCombat { .. } => "start_combat",
            Self::Attack { .. } => "attack",
            Self::EndTurn { .. } => "end_turn",
            Self::QueueAction { .. } => "queue_action",
            Self::Move { .. } => "move",
            Self::CombatState { .. } => "combat_state",
            Self::Ping { .. } => "ping",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

// ---------------------------------------------------------------------------
// ServerMessage
// ---------------------------------------------------------------------------

/// A derived, read-only view of an ongoing combat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombatSnapshot {
    /// `false` when no combat is running; the other fields are then empty.
    pub in_combat: bool,
    /// Combatants in initiative order.
    pub combatants: Vec<EntityId>,
    /// Whose turn it is.
    pub current: Option<EntityId>,
    /// Current round, starting at 1.
    pub round: u32,
    /// Nominal position of the fight.
    pub zone: Option<Position>,
    /// Active status effects per combatant.
    pub effects: BTreeMap<EntityId, Vec<String>>,
}

/// Messages the server sends to clients.
///
/// Adjacently tagged: `{ "type": "Event", "data": { … } }`. Events carry
/// their own `type` field, which would collide with an internal tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// First message on every connection: the session bound to it.
    Welcome {
        session_id: SessionId,
        player_id: EntityId,
        /// `true` when an existing session was resumed from the cookie.
        resumed: bool,
        /// `Set-Cookie` value the client should persist, present when a new
        /// session was created.
        set_cookie: Option<String>,
        /// `Strict-Transport-Security` value, sent with the cookie only
        /// when the connection arrived over a secure transport.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hsts: Option<String>,
    },

    /// A request succeeded.
    Ack { method: String },

    /// Response to [`ClientMessage::CombatState`].
    CombatState(CombatSnapshot),

    /// A broadcast game event.
    Event(GameEvent),

    /// Response to [`ClientMessage::Ping`].
    Pong { client_time: u64, server_time: u64 },

    /// A request failed. `code` follows HTTP conventions.
    Error { code: u16, message: String },
}
