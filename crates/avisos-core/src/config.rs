// ── Runtime client configuration ──
//
// Describes *how* the notification client connects and recovers.
// Built by the embedding application (CLI, app shell); core never
// reads config files.

use std::time::Duration;

use avisos_api::Endpoint;

/// Configuration for a single notification client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the notification stream lives.
    pub endpoint: Endpoint,

    /// Consecutive failed connection attempts before automatic
    /// reconnection gives up. A clean close or an absent session never
    /// retries regardless of this value.
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,

    /// How many recent notifications to keep for polling-style
    /// consumers. Oldest entries are dropped first.
    pub notification_log_size: usize,

    /// Capacity of the reload broadcast channel.
    pub reload_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(3),
            notification_log_size: 100,
            reload_channel_capacity: 64,
        }
    }
}
