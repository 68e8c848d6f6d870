//! # Skirmish
//!
//! Turn-based combat server for web games.
//!
//! Players connect over WebSocket and are bound to a cookie-backed session.
//! Requests (start combat, attack, end turn, queue action, move) are
//! resolved against the session's own character and checked against the
//! initiative order; every outcome is broadcast to all connected players as
//! a game event.
//!
//! Game rules live behind the [`World`](skirmish_combat::World) trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skirmish::prelude::*;
//!
//! // Implement World for your game, then:
//! // let server = SkirmishServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .spawn_player(|| EntityId::new("hero"))
//! //     .build(Arc::new(MyWorld::default()))
//! //     .await?;
//! // server.run().await
//! ```

mod broadcast;
mod config;
mod error;
mod handler;
mod server;

pub use broadcast::{Broadcaster, Delivery, EventBus};
pub use config::{BroadcastConfig, ServerConfig};
pub use error::SkirmishError;
pub use server::{PlayerSpawner, ShutdownHandle, SkirmishServer, SkirmishServerBuilder};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to
/// `info`. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Convenience re-exports for building a server and a world.
pub mod prelude {
    pub use std::sync::Arc;

    pub use skirmish_clock::{ClockConfig, GameClock, TriggerTime};
    pub use skirmish_combat::{
        ActionOutcome, ActionRequest, AttackOutcome, CombatConfig, CombatCoordinator,
        CombatError, DelayedAction, EffectTick, EventSink, TurnConfig, World, WorldError,
    };
    pub use skirmish_protocol::{
        ClientMessage, CombatSnapshot, EntityId, EventKind, GameEvent, ItemId, Position,
        ServerMessage, SessionId,
    };
    pub use skirmish_session::{SessionConfig, SessionRegistry};

    pub use crate::{
        BroadcastConfig, ServerConfig, ShutdownHandle, SkirmishError, SkirmishServer,
        SkirmishServerBuilder,
    };
}
