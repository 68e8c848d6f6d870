//! The session cookie handed to clients when a session is created.

use std::fmt;
use std::time::Duration;

use skirmish_protocol::SessionId;

/// A `Set-Cookie` value carrying a session id.
///
/// `Max-Age` equals the session timeout. Over a secure transport the cookie
/// is also `Secure` and `SameSite=Strict`, and the server advertises
/// strict transport security alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    name: String,
    session_id: SessionId,
    max_age: Duration,
    secure: bool,
}

impl SessionCookie {
    pub fn new(
        name: impl Into<String>,
        session_id: SessionId,
        max_age: Duration,
        secure: bool,
    ) -> Self {
        Self {
            name: name.into(),
            session_id,
            max_age,
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The full `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut value = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly",
            self.name,
            self.session_id.as_str(),
            self.max_age.as_secs()
        );
        if self.secure {
            value.push_str("; Secure; SameSite=Strict");
        } else {
            value.push_str("; SameSite=Lax");
        }
        value
    }

    /// `Strict-Transport-Security` value to send with the cookie, only
    /// over a secure transport.
    pub fn strict_transport_security(&self) -> Option<String> {
        self.secure
            .then(|| format!("max-age={}", self.max_age.as_secs()))
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}
