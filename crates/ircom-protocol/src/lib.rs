//! Wire protocol for ircom positional updates.
//!
//! Every message on the wire is one fixed 32-byte frame:
//!
//! ```text
//!   [5 bytes "ircom"][8 bytes BE f64 x][8 bytes BE f64 y][8 bytes BE f64 t][3 bytes "end"]
//! ```
//!
//! There is no length prefix; both ends rely on the fixed frame size.
//! Big-endian encoding keeps frames portable across architectures.

pub mod error;
pub mod payload;
pub mod wire;

pub use error::ProtocolError;
pub use payload::UpdatePayload;
pub use wire::{decode_frame, encode_frame, FrameReader, FrameWriter, FRAME_LEN, FOOTER, HEADER};
