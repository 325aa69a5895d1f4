//! Top-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrcomError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("discovery error: {0}")]
    Discovery(#[from] ircom_discovery::DiscoveryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
