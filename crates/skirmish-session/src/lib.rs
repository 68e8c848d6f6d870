//! Player sessions for Skirmish.
//!
//! A [`SessionRegistry`] maps opaque session ids to [`PlayerSession`]s.
//! Every piece of work done on behalf of a session holds a
//! [`SessionGuard`]; the [`SessionReaper`] evicts sessions that have been
//! idle longer than the timeout, but never one with a live guard.
//!
//! ```text
//!  connect ──→ get_or_create ──→ attach(link) ──→ get / guard per request
//!                  │                                    │
//!                  ▼                                    ▼
//!            SessionCookie                  idle + no guards ──→ sweep
//! ```

mod cookie;
mod error;
mod guard;
mod reaper;
mod registry;
mod session;

pub use cookie::SessionCookie;
pub use error::{SendError, SessionError};
pub use guard::SessionGuard;
pub use reaper::SessionReaper;
pub use registry::{SessionLease, SessionRegistry, SessionRequest};
pub use session::{Outbound, PlayerSession, SessionConfig, SessionLink};
