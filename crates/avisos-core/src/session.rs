// ── Session identity ──
//
// The authentication layer owns login/logout; this subsystem only
// observes the resulting identity. The client caches the user id to
// tell "same user, already connected" from "user changed".

use secrecy::SecretString;

/// The authenticated identity behind a notification connection.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Stable user identifier.
    pub user_id: String,
    /// Bearer token handed to the transport as a query parameter.
    pub token: SecretString,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: SecretString::from(token.into()),
        }
    }
}
