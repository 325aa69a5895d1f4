//! Discovery subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not be created or has failed. Fatal: background
    /// processing has stopped and the owning publisher/browser is dead.
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    /// Service registration was rejected. Not retryable; a likely cause is a
    /// name collision with another running instance.
    #[error("service registration failed (another instance may be running?): {0}")]
    Registration(String),

    /// The publisher/browser was closed while a caller was waiting. Expected
    /// during shutdown, not a failure.
    #[error("discovery closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
