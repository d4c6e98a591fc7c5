use easymesh_types::TransportError;
use thiserror::Error;

/// Errors that can occur in the relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A general network-level error.
    #[error("network error: {reason}")]
    NetworkError { reason: String },

    /// Failed to encode or decode a frame.
    #[error("codec error: {reason}")]
    CodecError { reason: String },

    /// Frame exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Peer is running an incompatible protocol version.
    #[error("protocol version mismatch: peer sent v{peer}, we run v{ours}")]
    VersionMismatch { peer: u8, ours: u8 },
}

impl From<RelayError> for TransportError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NetworkError { reason } => TransportError::NetworkError { reason },
            other => TransportError::NetworkError {
                reason: other.to_string(),
            },
        }
    }
}
