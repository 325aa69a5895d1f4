//! The serving peer: publishes the service and accepts connections.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;

use tokio::net::TcpListener;
use tokio::runtime;
use tokio::sync::watch;
use tokio::task;
use tracing::{error, info};

use ircom_discovery::{DiscoveryError, Publisher, ServicePublisher};
use ircom_protocol::UpdatePayload;

use crate::config::Config;
use crate::connection::{run_connection, ConnectionEnd};
use crate::error::IrcomError;
use crate::keeper::UpdateKeeper;

/// Serving side of an ircom link.
///
/// Construction binds the listener, starts a dedicated reactor thread, and
/// publishes the service. The reactor then accepts one connection at a
/// time and serves it until the peer goes away, going back to accepting;
/// updates keep flowing across peer reconnects. Dropping the server shuts
/// everything down and joins the reactor.
pub struct Server {
    keeper: UpdateKeeper,
    handle: runtime::Handle,
    publisher: Arc<dyn ServicePublisher>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
    reactor: Option<thread::JoinHandle<()>>,
}

impl Server {
    /// Serve `service_name` with the default configuration, advertised
    /// over mDNS.
    pub fn new(service_name: &str) -> Result<Self, IrcomError> {
        Self::with_config(Config::new(service_name))
    }

    /// Serve with an explicit configuration, advertised over mDNS.
    pub fn with_config(config: Config) -> Result<Self, IrcomError> {
        let publisher = Publisher::new(&config.service_name, config.port)?;
        Self::with_publisher(config, Arc::new(publisher))
    }

    /// Serve with a caller-supplied discovery backend. This is the seam
    /// tests use to run without a live mDNS daemon.
    pub fn with_publisher(
        config: Config,
        publisher: Arc<dyn ServicePublisher>,
    ) -> Result<Self, IrcomError> {
        let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let keeper = UpdateKeeper::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reactor = {
            let keeper = keeper.clone();
            let publisher = Arc::clone(&publisher);
            thread::Builder::new()
                .name("ircom-server".into())
                .spawn(move || {
                    runtime.block_on(serve(listener, publisher, keeper, shutdown_rx));
                })?
        };

        Ok(Self {
            keeper,
            handle,
            publisher,
            shutdown_tx,
            local_addr,
            reactor: Some(reactor),
        })
    }

    /// Queue an update for the connected peer. Cheap and non-blocking;
    /// without a connected peer the update is dropped.
    pub fn send_update(&self, payload: UpdatePayload) {
        let keeper = self.keeper.clone();
        self.handle.spawn(keeper.dispatch(payload));
    }

    /// The most recent update received from the peer, or the zero payload
    /// before any has arrived.
    pub fn latest_update(&self) -> UpdatePayload {
        self.keeper.latest_update()
    }

    /// The bound listener address. With a configured port of 0 this
    /// carries the OS-assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Closing the publisher first unblocks a publish() still waiting
        // inside the reactor, so the join below cannot hang on it.
        self.publisher.close();
        let _ = self.shutdown_tx.send(true);
        if let Some(reactor) = self.reactor.take() {
            let _ = reactor.join();
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    publisher: Arc<dyn ServicePublisher>,
    keeper: UpdateKeeper,
    mut shutdown: watch::Receiver<bool>,
) {
    // publish() blocks until the service is announced, so it runs on the
    // blocking pool instead of stalling the reactor.
    let published = {
        let publisher = Arc::clone(&publisher);
        task::spawn_blocking(move || publisher.publish()).await
    };
    match published {
        Ok(Ok(())) => info!("service published"),
        Ok(Err(DiscoveryError::Closed)) => {
            info!("publication aborted by shutdown");
            return;
        }
        Ok(Err(e)) => {
            error!(error = %e, "service publication failed, server stopping");
            return;
        }
        Err(e) => {
            error!(error = %e, "publish task failed, server stopping");
            return;
        }
    }

    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to adopt listener, server stopping");
            return;
        }
    };

    while !*shutdown.borrow() {
        let (stream, remote) = tokio::select! {
            _ = shutdown.changed() => {
                info!("acceptor shut down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed, server stopping");
                    break;
                }
            },
        };

        info!(remote = %remote, "peer connected");
        match run_connection(&keeper, stream, &mut shutdown).await {
            ConnectionEnd::Shutdown => break,
            ConnectionEnd::Disconnected(e) => {
                error!(error = %e, "connection failed, discarding it");
            }
        }
    }
}
