//! Game events: what happened in the world, as seen by every client.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EntityId;

/// Category of a [`GameEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Movement,
    CombatStart,
    CombatEnd,
    TurnStart,
    TurnEnd,
    Damage,
    Spellcast,
    Death,
    ItemDrop,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 9] = [
        Self::Movement,
        Self::CombatStart,
        Self::CombatEnd,
        Self::TurnStart,
        Self::TurnEnd,
        Self::Damage,
        Self::Spellcast,
        Self::Death,
        Self::ItemDrop,
    ];
}

/// The outbound event envelope: `{type, source, target, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityId>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl GameEvent {
    /// Creates an event stamped with the current wall time.
    pub fn new(kind: EventKind, source: EntityId) -> Self {
        Self {
            kind,
            source,
            target: None,
            data: Map::new(),
            timestamp: unix_millis(),
        }
    }

    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    /// Adds one `data` entry.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Current wall time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is before 1970.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
