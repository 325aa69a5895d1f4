//! The connecting peer: discovers the service and keeps a connection up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::runtime;
use tokio::sync::watch;
use tokio::task;
use tracing::{error, info, warn};

use ircom_discovery::{Browser, DiscoveryError, ServiceLocator};
use ircom_protocol::UpdatePayload;

use crate::config::Config;
use crate::connection::{run_connection, ConnectionEnd};
use crate::error::IrcomError;
use crate::keeper::UpdateKeeper;

/// Connecting side of an ircom link.
///
/// Construction starts discovery and a dedicated reactor thread. The
/// reactor waits for an instance of the target service, connects to it,
/// and serves the connection; when it drops, discovery is consulted again
/// and the cycle repeats. A failed connection attempt is retried after a
/// cooldown so an unreachable address does not turn into a busy loop.
/// Dropping the client shuts everything down and joins the reactor.
pub struct Client {
    keeper: UpdateKeeper,
    handle: runtime::Handle,
    locator: Arc<dyn ServiceLocator>,
    shutdown_tx: watch::Sender<bool>,
    reactor: Option<thread::JoinHandle<()>>,
}

impl Client {
    /// Look for `service_name` with the default configuration, over mDNS.
    pub fn new(service_name: &str) -> Result<Self, IrcomError> {
        Self::with_config(Config::new(service_name))
    }

    /// Connect with an explicit configuration, discovering over mDNS.
    pub fn with_config(config: Config) -> Result<Self, IrcomError> {
        let browser = Browser::new(&config.service_name, config.port)?;
        Self::with_locator(config, Arc::new(browser))
    }

    /// Connect with a caller-supplied discovery backend. This is the seam
    /// tests use to run without a live mDNS daemon.
    pub fn with_locator(
        config: Config,
        locator: Arc<dyn ServiceLocator>,
    ) -> Result<Self, IrcomError> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let keeper = UpdateKeeper::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cooldown = config.connect_retry_cooldown();

        let reactor = {
            let keeper = keeper.clone();
            let locator = Arc::clone(&locator);
            thread::Builder::new()
                .name("ircom-client".into())
                .spawn(move || {
                    runtime.block_on(run(locator, keeper, cooldown, shutdown_rx));
                })?
        };

        Ok(Self {
            keeper,
            handle,
            locator,
            shutdown_tx,
            reactor: Some(reactor),
        })
    }

    /// Queue an update for the server. Cheap and non-blocking; without an
    /// established connection the update is dropped.
    pub fn send_update(&self, payload: UpdatePayload) {
        let keeper = self.keeper.clone();
        self.handle.spawn(keeper.dispatch(payload));
    }

    /// The most recent update received from the server, or the zero
    /// payload before any has arrived.
    pub fn latest_update(&self) -> UpdatePayload {
        self.keeper.latest_update()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Closing the locator first unblocks a latest_service() still
        // waiting inside the reactor, so the join below cannot hang on it.
        self.locator.close();
        let _ = self.shutdown_tx.send(true);
        if let Some(reactor) = self.reactor.take() {
            let _ = reactor.join();
        }
    }
}

async fn run(
    locator: Arc<dyn ServiceLocator>,
    keeper: UpdateKeeper,
    cooldown: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        // latest_service() blocks until an instance is known, so it runs
        // on the blocking pool instead of stalling the reactor.
        let located = {
            let locator = Arc::clone(&locator);
            task::spawn_blocking(move || locator.latest_service()).await
        };
        let record = match located {
            Ok(Ok(record)) => record,
            Ok(Err(DiscoveryError::Closed)) => {
                info!("service discovery stopped");
                break;
            }
            Ok(Err(e)) => {
                error!(error = %e, "service discovery failed, client stopping");
                break;
            }
            Err(e) => {
                error!(error = %e, "discovery task failed, client stopping");
                break;
            }
        };

        let address = SocketAddr::new(record.address, record.port);
        info!(service = %record.fullname, %address, "connecting to service");

        let stream = tokio::select! {
            _ = shutdown.changed() => break,
            connected = TcpStream::connect(address) => match connected {
                Ok(stream) => stream,
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    warn!(%address, error = %e, "connection attempt failed, retrying");
                    // Back off before asking discovery again; it may still
                    // hand back the same address.
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(cooldown) => {}
                    }
                    continue;
                }
            },
        };

        info!(%address, "connected");
        match run_connection(&keeper, stream, &mut shutdown).await {
            ConnectionEnd::Shutdown => break,
            ConnectionEnd::Disconnected(e) => {
                warn!(error = %e, "connection lost, rediscovering");
            }
        }
    }
}
