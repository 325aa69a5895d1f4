//! The per-connection serve loop shared by server and client.

use std::io;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::info;

use crate::keeper::UpdateKeeper;

/// Why a connection stopped being served.
pub(crate) enum ConnectionEnd {
    /// Shutdown was requested; the owner is going away.
    Shutdown,
    /// The peer went away or the stream failed; the owner should look for
    /// a new connection.
    Disconnected(io::Error),
}

/// Serve one connection until it ends or shutdown is requested.
///
/// The keeper flushes outbound updates through the write half while this
/// task reads inbound frames from the read half. A read error raised while
/// shutdown is already requested is reported as a clean shutdown, whichever
/// of the two the select notices first.
pub(crate) async fn run_connection(
    keeper: &UpdateKeeper,
    stream: TcpStream,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut reader, writer) = stream.into_split();
    keeper.attach(Box::new(writer)).await;

    let end = tokio::select! {
        _ = shutdown.changed() => {
            info!("ongoing communication shut down");
            ConnectionEnd::Shutdown
        }
        err = keeper.run_inbound(&mut reader) => {
            if *shutdown.borrow() {
                info!("ongoing communication shut down");
                ConnectionEnd::Shutdown
            } else {
                ConnectionEnd::Disconnected(err)
            }
        }
    };

    keeper.detach().await;
    end
}
