//! Protocol errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}
