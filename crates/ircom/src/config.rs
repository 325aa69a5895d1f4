//! Instance configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by [`Server`](crate::Server) and
/// [`Client`](crate::Client). Both peers must agree on `service_name` and
/// `port` for discovery to match them up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service instance name advertised by the server and targeted by the
    /// client.
    pub service_name: String,

    /// TCP port the server listens on and advertises. The client only
    /// accepts services resolved to this port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long the client waits after a failed connection attempt before
    /// asking discovery again.
    #[serde(default = "default_connect_retry_cooldown_ms")]
    pub connect_retry_cooldown_ms: u64,
}

fn default_port() -> u16 {
    40001
}

fn default_connect_retry_cooldown_ms() -> u64 {
    1000
}

impl Config {
    /// Configuration with the default port and retry cooldown.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            port: default_port(),
            connect_retry_cooldown_ms: default_connect_retry_cooldown_ms(),
        }
    }

    pub(crate) fn connect_retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.connect_retry_cooldown_ms)
    }
}
