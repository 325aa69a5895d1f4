//! Update bookkeeping for the live connection: a bounded outbound queue
//! flushed by at most one task at a time, and the latest inbound snapshot.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, warn};

use ircom_protocol::{FrameReader, FrameWriter, UpdatePayload};

/// Maximum number of pending outbound updates.
pub(crate) const UPDATE_RING_CAP: usize = 200;

/// Bounded FIFO of pending updates. A push onto a full ring evicts the
/// oldest element instead of blocking the producer; stale positions are
/// worth less than fresh ones.
pub(crate) struct UpdateRing {
    buf: VecDeque<UpdatePayload>,
    cap: usize,
}

impl UpdateRing {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append `payload`. Returns true when the oldest element was evicted
    /// to make room.
    pub(crate) fn push(&mut self, payload: UpdatePayload) -> bool {
        let rotated = self.buf.len() == self.cap;
        if rotated {
            self.buf.pop_front();
        }
        self.buf.push_back(payload);
        rotated
    }

    pub(crate) fn front(&self) -> Option<UpdatePayload> {
        self.buf.front().copied()
    }

    pub(crate) fn pop_front(&mut self) {
        self.buf.pop_front();
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }
}

type BoxedWriter = FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>;

struct Outbound {
    ring: UpdateRing,
    /// The element currently being written was evicted from the ring while
    /// the write was in flight. The flusher must not pop after such a
    /// write; the front is already the next element to send.
    rotated: bool,
    /// A flush loop is running. Guarantees a single writer per connection.
    flushing: bool,
    /// A connection is attached. Updates dispatched without one are
    /// dropped and the ring is cleared.
    connected: bool,
}

struct Shared {
    latest: Mutex<UpdatePayload>,
    outbound: Mutex<Outbound>,
    // Held only across a single frame write; the std mutex above is never
    // held across an await.
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    // Raised by detach to cancel an in-flight frame write. A peer that
    // stops reading would otherwise keep the writer lock held forever.
    abort: watch::Sender<bool>,
}

/// Shared update state between the reactor's connection task and callers
/// on arbitrary threads. Cloning is cheap and shares the state.
#[derive(Clone)]
pub(crate) struct UpdateKeeper {
    shared: Arc<Shared>,
}

impl UpdateKeeper {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                latest: Mutex::new(UpdatePayload::default()),
                outbound: Mutex::new(Outbound {
                    ring: UpdateRing::new(UPDATE_RING_CAP),
                    rotated: false,
                    flushing: false,
                    connected: false,
                }),
                writer: tokio::sync::Mutex::new(None),
                abort: watch::channel(false).0,
            }),
        }
    }

    /// The most recent update received from the peer, or the zero payload
    /// before any frame has arrived.
    pub(crate) fn latest_update(&self) -> UpdatePayload {
        *self.shared.latest.lock().unwrap()
    }

    /// Install the writer half of a fresh connection. Leftovers queued for
    /// a previous connection are discarded.
    pub(crate) async fn attach(&self, writer: Box<dyn AsyncWrite + Send + Unpin>) {
        self.shared.abort.send_replace(false);
        *self.shared.writer.lock().await = Some(FrameWriter::new(writer));
        let mut out = self.shared.outbound.lock().unwrap();
        out.ring.clear();
        out.rotated = false;
        out.connected = true;
    }

    /// Remove the writer. An in-flight frame write is cancelled first, so
    /// this cannot wait forever on a peer that stopped reading; the flush
    /// loop then stops on its own.
    pub(crate) async fn detach(&self) {
        self.shared.outbound.lock().unwrap().connected = false;
        self.shared.abort.send_replace(true);
        self.shared.writer.lock().await.take();
    }

    /// Queue `payload` for the peer and make sure a flush loop is running.
    /// At most one caller becomes the flusher; the rest return after
    /// queueing. Without a connection the payload is dropped.
    pub(crate) async fn dispatch(self, payload: UpdatePayload) {
        {
            let mut out = self.shared.outbound.lock().unwrap();
            if !out.connected {
                out.ring.clear();
                out.rotated = false;
                return;
            }
            if out.ring.push(payload) {
                out.rotated = true;
                warn!("outbound update queue full, dropping oldest update");
            }
            if out.flushing {
                return;
            }
            out.flushing = true;
        }
        self.flush().await;
    }

    /// Drain the ring one frame at a time. Runs until the ring is empty or
    /// a write fails; either way the flushing flag is released so a later
    /// dispatch can start a new loop.
    async fn flush(&self) {
        loop {
            let Some(payload) = ({
                let mut out = self.shared.outbound.lock().unwrap();
                let front = out.ring.front();
                if front.is_none() {
                    out.flushing = false;
                }
                front
            }) else {
                return;
            };

            let result = match self.shared.writer.lock().await.as_mut() {
                Some(writer) => {
                    let mut aborted = self.shared.abort.subscribe();
                    tokio::select! {
                        result = writer.send(&payload) => result,
                        _ = aborted.wait_for(|&aborted| aborted) => Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "connection detached",
                        )),
                    }
                }
                None => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no connection attached",
                )),
            };

            let mut out = self.shared.outbound.lock().unwrap();
            match result {
                Ok(()) => {
                    if out.rotated {
                        // The front we just sent was already evicted; the
                        // current front is the next element.
                        out.rotated = false;
                    } else {
                        out.ring.pop_front();
                    }
                }
                Err(e) => {
                    debug!(error = %e, "flush stopped");
                    out.flushing = false;
                    return;
                }
            }
        }
    }

    /// Read frames until the stream errors, keeping the latest snapshot.
    /// Returns the error that ended the stream (EOF included).
    pub(crate) async fn run_inbound<R>(&self, reader: &mut R) -> io::Error
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FrameReader::new(reader);
        loop {
            match frames.recv().await {
                Ok(payload) => *self.shared.latest.lock().unwrap() = payload,
                Err(e) => return e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use ircom_protocol::{decode_frame, FRAME_LEN};

    use super::*;

    fn payload(t: f64) -> UpdatePayload {
        UpdatePayload::new(t, -t, t)
    }

    #[test]
    fn ring_overflow_drops_oldest_and_keeps_order() {
        let mut ring = UpdateRing::new(UPDATE_RING_CAP);
        let mut rotations = 0;
        for i in 0..250 {
            if ring.push(payload(f64::from(i))) {
                rotations += 1;
            }
        }
        assert_eq!(rotations, 50);
        assert_eq!(ring.len(), UPDATE_RING_CAP);
        for i in 50..250 {
            assert_eq!(ring.front(), Some(payload(f64::from(i))));
            ring.pop_front();
        }
        assert_eq!(ring.front(), None);
    }

    #[tokio::test]
    async fn dispatch_flushes_frames_in_order() {
        let keeper = UpdateKeeper::new();
        let (writer, mut remote) = duplex(4096);
        keeper.attach(Box::new(writer)).await;

        for i in 0..3 {
            keeper.clone().dispatch(payload(f64::from(i))).await;
        }

        let mut frame = [0u8; FRAME_LEN];
        for i in 0..3 {
            remote.read_exact(&mut frame).await.unwrap();
            assert_eq!(decode_frame(&frame), payload(f64::from(i)));
        }
    }

    #[tokio::test]
    async fn dispatch_without_connection_drops_the_update() {
        let keeper = UpdateKeeper::new();
        keeper.clone().dispatch(payload(1.0)).await;

        let (writer, mut remote) = duplex(4096);
        keeper.attach(Box::new(writer)).await;
        keeper.clone().dispatch(payload(2.0)).await;
        keeper.detach().await;

        // Only the post-attach update made it onto the wire.
        let mut bytes = Vec::new();
        remote.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes.len(), FRAME_LEN);
        let frame: [u8; FRAME_LEN] = bytes.as_slice().try_into().unwrap();
        assert_eq!(decode_frame(&frame), payload(2.0));
    }

    #[tokio::test]
    async fn rotation_during_blocked_write_skips_the_stale_pop() {
        let keeper = UpdateKeeper::new();
        // Exactly one frame fits in the pipe, so the second write blocks.
        let (writer, mut remote) = duplex(FRAME_LEN);
        keeper.attach(Box::new(writer)).await;

        keeper.clone().dispatch(payload(0.0)).await;

        // This flusher blocks writing frame 1 while the pipe is full.
        let blocked = tokio::spawn(keeper.clone().dispatch(payload(1.0)));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        // Overfill the ring while frame 1 is in flight: 1 + 250 pushes on
        // a 200-slot ring evicts updates 1..=51, including the in-flight
        // one, so updates 52..=251 remain queued.
        for i in 2..252 {
            keeper.clone().dispatch(payload(f64::from(i))).await;
        }

        let mut received = Vec::new();
        let mut frame = [0u8; FRAME_LEN];
        for _ in 0..202 {
            remote.read_exact(&mut frame).await.unwrap();
            received.push(decode_frame(&frame).t);
        }
        blocked.await.unwrap();

        let mut expected = vec![0.0, 1.0];
        expected.extend((52..252).map(f64::from));
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn detach_cancels_a_write_the_peer_never_reads() {
        let keeper = UpdateKeeper::new();
        // Keep the far end alive but never read from it: the first frame
        // fills the pipe and the second write stays blocked.
        let (writer, _remote) = duplex(FRAME_LEN);
        keeper.attach(Box::new(writer)).await;

        keeper.clone().dispatch(payload(0.0)).await;
        let blocked = tokio::spawn(keeper.clone().dispatch(payload(1.0)));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(2), keeper.detach())
            .await
            .expect("detach hung on a peer that stopped reading");
        tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .expect("flusher kept running after detach")
            .unwrap();
    }

    #[tokio::test]
    async fn inbound_keeps_only_the_latest_update() {
        let keeper = UpdateKeeper::new();
        let (mut remote, mut reader) = duplex(4096);

        let inbound = {
            let keeper = keeper.clone();
            tokio::spawn(async move { keeper.run_inbound(&mut reader).await })
        };

        assert_eq!(keeper.latest_update(), UpdatePayload::default());

        let (a, b) = (payload(1.0), payload(2.0));
        {
            let mut writer = FrameWriter::new(&mut remote);
            writer.send(&a).await.unwrap();
            writer.send(&b).await.unwrap();
        }
        remote.shutdown().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), inbound)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(keeper.latest_update(), b);
    }
}
