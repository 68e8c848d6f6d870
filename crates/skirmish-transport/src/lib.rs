//! Transport abstraction layer for Skirmish.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the realtime channel a player session is bound to, plus the
//! [`HandshakeInfo`] captured during the upgrade (cookies and whether the
//! request arrived over a secure channel).
//!
//! # Feature Flags
//!
//! - `websocket` (default), WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HandshakeInfo
// ---------------------------------------------------------------------------

/// What the server learned about the client while upgrading the connection.
///
/// The session layer reads the session cookie from here and derives the
/// cookie's `Secure` flag from [`secure`](Self::secure).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
    /// Raw `Cookie` header, if the client sent one.
    pub cookie_header: Option<String>,
    /// `true` when the request arrived over TLS, either directly or via a
    /// proxy that set `X-Forwarded-Proto: https`.
    pub secure: bool,
}

impl HandshakeInfo {
    /// Returns the value of the named cookie from the `Cookie` header.
    ///
    /// Empty values are treated as absent.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let header = self.cookie_header.as_deref()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name && !value.trim().is_empty())
                .then(|| value.trim())
        })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive bytes.
///
/// `send` and `recv` may be called concurrently from different tasks: the
/// connection handler reads while a writer task drains the session's
/// outbound queue.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the metadata captured during the upgrade handshake.
    fn handshake(&self) -> &HandshakeInfo;
}
