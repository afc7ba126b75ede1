//! Notification endpoint construction.
//!
//! The stream lives at `<ws|wss>://<host>:<port>/ws?token=<credential>`.
//! The credential always travels as a query parameter: the browser-grade
//! WebSocket handshake the server was built for does not accept custom
//! headers, so a bearer header is not an option.

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

/// Where to reach the notification stream.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Use `wss://` instead of `ws://`. Mirrors whether the hosting
    /// origin is secure.
    pub secure: bool,
    /// URL path of the stream.
    pub path: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            secure: false,
            path: "/ws".into(),
        }
    }
}

impl Endpoint {
    /// Build the full connect URL with the session token attached.
    pub fn url(&self, token: &SecretString) -> Result<Url, Error> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        let mut url = Url::parse(&format!("{scheme}://{}:{}{path}", self.host, self.port))?;
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());
        Ok(url)
    }
}
