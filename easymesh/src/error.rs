use easymesh_types::TransportError;
use thiserror::Error;

/// Errors that prevent a peer from being created.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
