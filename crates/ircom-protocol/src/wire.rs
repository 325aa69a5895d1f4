//! Frame layout and async framing over a byte stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::payload::{UpdatePayload, PAYLOAD_LEN};

/// Frame header marker.
pub const HEADER: &[u8; 5] = b"ircom";

/// Frame footer marker.
pub const FOOTER: &[u8; 3] = b"end";

/// Total frame length: header + payload + footer, no length prefix.
pub const FRAME_LEN: usize = HEADER.len() + PAYLOAD_LEN + FOOTER.len();

/// Encode one payload as a complete wire frame.
pub fn encode_frame(payload: &UpdatePayload) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..HEADER.len()].copy_from_slice(HEADER);
    let mut body = Vec::with_capacity(PAYLOAD_LEN);
    payload.write_be(&mut body);
    frame[HEADER.len()..HEADER.len() + PAYLOAD_LEN].copy_from_slice(&body);
    frame[HEADER.len() + PAYLOAD_LEN..].copy_from_slice(FOOTER);
    frame
}

/// Decode the payload portion of a wire frame.
///
/// The marker bytes are not inspected: both ends speak a fixed-size frame
/// and the payload position is known.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> UpdatePayload {
    match UpdatePayload::read_be(&frame[HEADER.len()..HEADER.len() + PAYLOAD_LEN]) {
        Ok(payload) => payload,
        // Unreachable: the slice length is fixed by the frame type.
        Err(_) => UpdatePayload::default(),
    }
}

/// Writes whole frames to an underlying stream.
///
/// Each frame goes out as a single `write_all`, so a frame is never
/// interleaved with another writer's bytes as long as one writer is active
/// at a time.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and send one payload.
    pub async fn send(&mut self, payload: &UpdatePayload) -> io::Result<()> {
        let frame = encode_frame(payload);
        self.inner.write_all(&frame).await
    }
}

/// Reads whole frames from an underlying stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read exactly one frame and decode its payload.
    ///
    /// A peer that closes the stream mid-frame (or before one) surfaces as
    /// `io::ErrorKind::UnexpectedEof`.
    pub async fn recv(&mut self) -> io::Result<UpdatePayload> {
        let mut frame = [0u8; FRAME_LEN];
        self.inner.read_exact(&mut frame).await?;
        Ok(decode_frame(&frame))
    }
}
