//! `SkirmishServer` builder and server loop.
//!
//! Ties the layers together: transport → protocol → session → combat, plus
//! the background tasks (session reaper, broadcaster, turn-timeout
//! notices) that share one shutdown signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use skirmish_clock::{ClockConfig, GameClock};
use skirmish_combat::{CombatConfig, CombatCoordinator, TurnNotices, World};
use skirmish_protocol::{EntityId, GameEvent, JsonCodec};
use skirmish_session::{SessionConfig, SessionReaper, SessionRegistry};
use skirmish_transport::{Transport, WebSocketTransport};
use tokio::sync::{broadcast, watch};

use crate::broadcast::{Broadcaster, EventBus};
use crate::handler::handle_connection;
use crate::{BroadcastConfig, ServerConfig, SkirmishError};

/// Produces the character a new session controls.
pub type PlayerSpawner = Arc<dyn Fn() -> EntityId + Send + Sync>;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<W: World> {
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) combat: Arc<CombatCoordinator<W>>,
    pub(crate) spawn_player: PlayerSpawner,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Skirmish server.
///
/// # Example
///
/// ```rust,ignore
/// use skirmish::prelude::*;
///
/// let server = SkirmishServer::builder()
///     .bind("0.0.0.0:8080")
///     .spawn_player(move || world.spawn_hero())
///     .build(world)
///     .await?;
/// server.run().await
/// ```
pub struct SkirmishServerBuilder {
    config: ServerConfig,
    spawn_player: Option<PlayerSpawner>,
}

impl SkirmishServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            spawn_player: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn request_deadline(mut self, deadline: Duration) -> Self {
        self.config.request_deadline = deadline;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn clock_config(mut self, config: ClockConfig) -> Self {
        self.config.clock = config;
        self
    }

    pub fn combat_config(mut self, config: CombatConfig) -> Self {
        self.config.combat = config;
        self
    }

    pub fn broadcast_config(mut self, config: BroadcastConfig) -> Self {
        self.config.broadcast = config;
        self
    }

    /// Sets how characters are created for new sessions. Without one,
    /// sessions get ids `player-1`, `player-2`, ... that the world is
    /// expected to know about.
    pub fn spawn_player<F>(mut self, spawn: F) -> Self
    where
        F: Fn() -> EntityId + Send + Sync + 'static,
    {
        self.spawn_player = Some(Arc::new(spawn));
        self
    }

    /// Binds the listener and wires up the server around `world`.
    pub async fn build<W: World>(self, world: Arc<W>) -> Result<SkirmishServer<W>, SkirmishError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let clock = GameClock::new(config.clock.clone());
        let bus = EventBus::new(config.broadcast.channel_capacity);
        // Subscribe before anything can emit.
        let events = bus.subscribe();
        let (combat, notices) =
            CombatCoordinator::new(world, Arc::new(bus), config.combat.clone(), clock);
        let sessions = Arc::new(SessionRegistry::new(config.session.clone(), clock));

        let state = Arc::new(ServerState {
            sessions,
            combat: Arc::new(combat),
            spawn_player: self.spawn_player.unwrap_or_else(numbered_players),
            codec: JsonCodec,
            config,
        });
        let (shutdown, _) = watch::channel(false);

        Ok(SkirmishServer {
            transport,
            state,
            notices,
            events,
            shutdown: Arc::new(shutdown),
        })
    }
}

impl Default for SkirmishServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn numbered_players() -> PlayerSpawner {
    let next = AtomicU64::new(1);
    Arc::new(move || EntityId::new(format!("player-{}", next.fetch_add(1, Ordering::Relaxed))))
}

/// Stops a running server from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signals every server task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// A bound Skirmish server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct SkirmishServer<W: World> {
    transport: WebSocketTransport,
    state: Arc<ServerState<W>>,
    notices: TurnNotices,
    events: broadcast::Receiver<GameEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<W: World> SkirmishServer<W> {
    /// Creates a new builder.
    pub fn builder() -> SkirmishServerBuilder {
        SkirmishServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// The combat coordinator, for driving the world from outside a
    /// connection (NPC turns, admin tools, tests).
    pub fn combat(&self) -> &Arc<CombatCoordinator<W>> {
        &self.state.combat
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Runs the accept loop and the background tasks until shut down.
    ///
    /// Each accepted connection gets its own handler task. On shutdown the
    /// accept loop stops first, then the reaper, broadcaster and notice
    /// processor are joined.
    pub async fn run(self) -> Result<(), SkirmishError> {
        let Self {
            mut transport,
            state,
            notices,
            events,
            shutdown,
        } = self;

        let reaper = SessionReaper::spawn_with(Arc::clone(&state.sessions), shutdown.subscribe());
        let broadcaster = tokio::spawn(
            Broadcaster::new(Arc::clone(&state.sessions), state.config.broadcast.clone())
                .run(events, shutdown.subscribe()),
        );
        let notice_processor = {
            let combat = Arc::clone(&state.combat);
            let stop = shutdown.subscribe();
            tokio::spawn(async move { combat.run_notices(notices, stop).await })
        };

        tracing::info!(addr = %state.config.bind_addr, "skirmish server running");

        let mut stop = shutdown.subscribe();
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        let stop = shutdown.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state, stop).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("skirmish server shutting down");
        let (reaped, broadcast, notices) = tokio::join!(reaper, broadcaster, notice_processor);
        for (task, result) in [("reaper", reaped), ("broadcaster", broadcast), ("notices", notices)] {
            if let Err(e) = result {
                tracing::error!(task, error = %e, "background task failed");
            }
        }
        Ok(())
    }
}
