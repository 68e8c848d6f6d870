//! Per-connection handler: session binding, request dispatch, replies.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Resume the session named by the cookie, or create one
//!   2. Attach the connection as the session's link, send `Welcome`
//!   3. Loop: receive requests → dispatch under the request deadline → reply
//!
//! Each request runs in its own task. The deadline bounds how long the
//! handler waits for it, not the request itself: once a combat operation
//! has changed the world it always runs to the end, so an expired request
//! never leaves a dead combatant in the initiative or drops due actions.
//!
//! Replies and broadcast events share the session's outbound queue, which a
//! separate writer task drains into the socket.

use std::sync::Arc;

use skirmish_combat::{ActionRequest, World};
use skirmish_protocol::{ClientMessage, Codec, ServerMessage, unix_millis};
use skirmish_session::{
    Outbound, PlayerSession, SendError, SessionCookie, SessionLink, SessionRequest,
};
use skirmish_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::{mpsc, watch};

use crate::SkirmishError;
use crate::server::ServerState;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<W: World>(
    conn: WebSocketConnection,
    state: Arc<ServerState<W>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SkirmishError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Session ---
    let request =
        SessionRequest::from_handshake(conn.handshake(), &state.sessions.config().cookie_name);
    let lease = state
        .sessions
        .get_or_create(&request, || (state.spawn_player)())
        .await;
    let session = Arc::clone(lease.guard.session());

    // --- Step 2: Link + Welcome ---
    let (link, outbound) =
        SessionLink::channel(conn_id, state.sessions.config().outbound_capacity);
    let writer = tokio::spawn(write_outbound(Arc::clone(&conn), outbound));
    state.sessions.attach(&session, link.clone());

    let lease_resumed = lease.resumed;
    let welcome = ServerMessage::Welcome {
        session_id: session.id().clone(),
        player_id: session.player().clone(),
        resumed: lease_resumed,
        set_cookie: lease.cookie.as_ref().map(SessionCookie::header_value),
        hsts: lease
            .cookie
            .as_ref()
            .and_then(SessionCookie::strict_transport_security),
    };
    // The connection itself does not pin the session; only requests do.
    drop(lease);

    let replies = Replies {
        link,
        state: &state,
    };
    let result = match replies.send(&welcome).await {
        Ok(()) => {
            tracing::info!(
                %conn_id,
                session_id = %session.id(),
                player = %session.player(),
                resumed = lease_resumed,
                "player connected"
            );
            // --- Step 3: Request loop ---
            serve(&conn, &state, &session, &replies, &mut shutdown).await
        }
        Err(e) => Err(e),
    };

    state.sessions.detach(&session, conn_id);
    // Last sender gone: the writer flushes what is queued and closes.
    drop(replies);
    if let Err(e) = writer.await {
        tracing::error!(%conn_id, error = %e, "writer task failed");
    }
    tracing::info!(%conn_id, session_id = %session.id(), "player disconnected");
    result
}

async fn serve<W: World>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<W>>,
    session: &PlayerSession,
    replies: &Replies<'_, W>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SkirmishError> {
    let conn_id = conn.id();
    let idle = state.config.idle_timeout;
    let deadline = state.config.request_deadline;

    loop {
        if *shutdown.borrow() {
            tracing::debug!(%conn_id, "closing connection for shutdown");
            return Ok(());
        }

        let data = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                continue;
            }
            received = tokio::time::timeout(idle, conn.recv()) => match received {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    tracing::debug!(%conn_id, "connection closed cleanly");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    return Ok(());
                }
                Err(_) => {
                    tracing::info!(%conn_id, "connection timed out");
                    return Ok(());
                }
            },
        };
        // Any traffic keeps the bound session alive, even pings and
        // frames that fail to decode.
        session.touch();

        let message: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                let e = SkirmishError::from(e);
                tracing::debug!(%conn_id, error = %e, "failed to decode request");
                replies.error(&e).await?;
                continue;
            }
        };

        if let ClientMessage::Disconnect { reason } = &message {
            tracing::info!(%conn_id, %reason, "client disconnected");
            return Ok(());
        }

        let method = message.method();
        let mut request = tokio::spawn(dispatch(Arc::clone(state), message));
        let outcome = match tokio::time::timeout(deadline, &mut request).await {
            Ok(joined) => joined.map_err(SkirmishError::from).and_then(|r| r),
            Err(_) => Err(SkirmishError::DeadlineExceeded(deadline)),
        };
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e @ SkirmishError::DeadlineExceeded(_)) => {
                // Dropping the handle detaches the task; it still finishes.
                tracing::warn!(%conn_id, method, error = %e, "request abandoned");
                error_message(&e)
            }
            Err(e) => {
                if e.is_expected() {
                    tracing::debug!(%conn_id, method, error = %e, "request rejected");
                } else {
                    tracing::error!(%conn_id, method, error = %e, "request failed");
                }
                error_message(&e)
            }
        };
        replies.send(&reply).await?;
    }
}

/// Runs one request. The actor is always the session's own character.
///
/// Each request holds a session guard for its duration, so the reaper
/// cannot evict a session in the middle of an action. The guard is taken
/// (and the registry lock released) before any turn lock.
async fn dispatch<W: World>(
    state: Arc<ServerState<W>>,
    message: ClientMessage,
) -> Result<ServerMessage, SkirmishError> {
    let ack = ServerMessage::Ack {
        method: message.method().to_string(),
    };
    let combat = &state.combat;

    match message {
        ClientMessage::Ping { client_time } => Ok(ServerMessage::Pong {
            client_time,
            server_time: unix_millis(),
        }),

        ClientMessage::StartCombat {
            session_id,
            participants,
        } => {
            let _guard = state.sessions.get(&session_id).await?;
            combat.start_combat(participants).await?;
            Ok(ack)
        }

        ClientMessage::Attack {
            session_id,
            target_id,
            weapon_id,
        } => {
            let guard = state.sessions.get(&session_id).await?;
            combat
                .attack(guard.player(), &target_id, weapon_id.as_ref())
                .await?;
            Ok(ack)
        }

        ClientMessage::EndTurn { session_id } => {
            let guard = state.sessions.get(&session_id).await?;
            combat.end_turn(guard.player()).await?;
            Ok(ack)
        }

        ClientMessage::QueueAction {
            session_id,
            action_type,
            target_position,
            parameters,
            delay_ticks,
        } => {
            let guard = state.sessions.get(&session_id).await?;
            let request = ActionRequest {
                action_type,
                target_position,
                parameters,
                delay_ticks,
            };
            combat.queue_action(guard.player(), request).await?;
            Ok(ack)
        }

        ClientMessage::Move { session_id, to } => {
            let guard = state.sessions.get(&session_id).await?;
            combat.move_to(guard.player(), to).await?;
            Ok(ack)
        }

        ClientMessage::CombatState { session_id } => {
            let _guard = state.sessions.get(&session_id).await?;
            Ok(ServerMessage::CombatState(combat.combat_state().await))
        }

        ClientMessage::Disconnect { .. } => Ok(ack),
    }
}

fn error_message(e: &SkirmishError) -> ServerMessage {
    ServerMessage::Error {
        code: e.code(),
        message: e.to_string(),
    }
}

/// Replies to this connection go through its own link, so they queue
/// behind (and never overtake) events already sent to the client.
struct Replies<'a, W: World> {
    link: SessionLink,
    state: &'a ServerState<W>,
}

impl<W: World> Replies<'_, W> {
    /// Queues `message`. A full queue drops the reply and keeps the
    /// connection; a closed one ends it.
    async fn send(&self, message: &ServerMessage) -> Result<(), SkirmishError> {
        let frame: Arc<[u8]> = self.state.codec.encode(message)?.into();
        let timeout = self.state.sessions.config().send_timeout;
        match self.link.send(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendError::Full) => {
                tracing::warn!(
                    conn_id = %self.link.connection_id(),
                    "outbound queue full, reply dropped"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn error(&self, e: &SkirmishError) -> Result<(), SkirmishError> {
        self.send(&error_message(e)).await
    }
}

/// Drains the outbound queue into the socket until `Close`, the end of the
/// queue, or a send failure, then closes the transport.
async fn write_outbound(conn: Arc<WebSocketConnection>, mut outbound: mpsc::Receiver<Outbound>) {
    let conn_id: ConnectionId = conn.id();
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = conn.send(&frame).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, stopping writer");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    // Senders see the link as disconnected from here on.
    outbound.close();
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
}
