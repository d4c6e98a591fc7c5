use thiserror::Error;

use crate::name::PeerName;

/// Errors from building a [`PeerName`].
#[derive(Debug, Error)]
pub enum PeerNameError {
    /// The string is not a colon-separated list of hex octets.
    #[error("invalid peer name format: {input:?}")]
    InvalidFormat { input: String },

    /// The OS entropy source could not be read.
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] std::io::Error),
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address could not be parsed or resolved.
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Connecting to the address failed.
    #[error("connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// No route to the named peer.
    #[error("unknown peer: {name}")]
    UnknownPeer { name: PeerName },

    /// The transport cannot take work.
    #[error("transport unavailable: {reason}")]
    Unavailable { reason: String },

    /// The transport could not be set up.
    #[error("network error: {reason}")]
    NetworkError { reason: String },
}
