//! mDNS/DNS-SD zero-config discovery for ircom peers.
//!
//! One side advertises a named `_ircom._tcp` service ([`Publisher`]); the
//! other watches for instances of that name and keeps a live list of
//! resolved addresses ([`Browser`]). Both wrap the internally-threaded
//! `mdns-sd` service daemon and bridge its event channels to blocking
//! callers with a mutex + condvar, so the daemon thread never blocks.
//!
//! The [`ServicePublisher`] and [`ServiceLocator`] traits are the seam
//! between discovery and the transport layer; tests inject their own
//! implementations instead of a live mDNS daemon.

use std::net::IpAddr;

pub mod browser;
pub mod error;
pub mod publisher;

pub use browser::Browser;
pub use error::DiscoveryError;
pub use publisher::Publisher;

/// DNS-SD service type for ircom peers, in mdns-sd domain form.
pub const SERVICE_TYPE: &str = "_ircom._tcp.local.";

/// Resolved addresses are filtered to IPv4. Must match the address family
/// the server's listener is bound over.
pub(crate) const RESOLVE_IPV4: bool = true;

/// A resolved instance of the target service.
///
/// The fullname (`<instance>.<service>.<domain>`) is the identity the mDNS
/// daemon reports removals against; a removal deletes every record carrying
/// the same fullname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Full service instance name, e.g. `alpha._ircom._tcp.local.`.
    pub fullname: String,
    /// Resolved peer address.
    pub address: IpAddr,
    /// Advertised service port.
    pub port: u16,
}

/// Advertises this instance on the network.
pub trait ServicePublisher: Send + Sync + 'static {
    /// Publish the service and block until it is visible. Idempotent:
    /// concurrent calls converge on one underlying registration.
    fn publish(&self) -> Result<(), DiscoveryError>;

    /// Abort publication and unblock any waiting `publish()` calls with
    /// [`DiscoveryError::Closed`]. Idempotent.
    fn close(&self);
}

/// Finds instances of the target service.
pub trait ServiceLocator: Send + Sync + 'static {
    /// Block until at least one instance is known, then return the most
    /// recently discovered one. Fails with [`DiscoveryError::Closed`] once
    /// [`close`](ServiceLocator::close) has been called.
    fn latest_service(&self) -> Result<ServiceRecord, DiscoveryError>;

    /// Stop discovery and wake all waiters. Idempotent.
    fn close(&self);
}

/// Extract the instance name from a service fullname:
/// `alpha._ircom._tcp.local.` -> `alpha`.
pub(crate) fn instance_name(fullname: &str) -> &str {
    fullname.find("._").map_or(fullname, |i| &fullname[..i])
}
