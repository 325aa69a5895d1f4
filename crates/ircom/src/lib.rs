//! Zero-configuration positional-update links over the local network.
//!
//! A [`Server`] advertises a named `_ircom._tcp` service over mDNS/DNS-SD
//! and accepts one TCP connection at a time; a [`Client`] discovers that
//! name and keeps a connection to it alive. Once linked, both sides
//! exchange fixed 32-byte positional update frames in both directions:
//! [`send_update`](Server::send_update) queues an update for the peer and
//! [`latest_update`](Server::latest_update) reads the most recent one the
//! peer sent. Both calls are non-blocking and safe from any thread; all
//! networking runs on a dedicated reactor thread per instance.
//!
//! Either side survives the other going away: the server goes back to
//! accepting, the client rediscovers and reconnects. Dropping a `Server`
//! or `Client` shuts its reactor down cleanly.

pub mod client;
pub mod config;
mod connection;
pub mod error;
mod keeper;
pub mod server;

pub use client::Client;
pub use config::Config;
pub use error::IrcomError;
pub use server::Server;

pub use ircom_discovery::{DiscoveryError, ServiceLocator, ServicePublisher, ServiceRecord};
pub use ircom_protocol::UpdatePayload;
