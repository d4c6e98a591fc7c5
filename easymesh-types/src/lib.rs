//! Shared type definitions for easymesh.
//!
//! Peer names and how to derive them, the broadcast container, membership
//! snapshots, and the traits a transport implements to carry easymesh
//! traffic.

pub mod error;
pub mod gossip;
pub mod membership;
pub mod name;
pub mod transport;

pub use error::{PeerNameError, TransportError};
pub use gossip::{
    BroadcastOutcome, GossipData, GossipMessage, Gossiper, HandlerError, HandlerResult,
};
pub use membership::{Membership, PeerDescription};
pub use name::PeerName;
pub use transport::{GossipSender, HostConfig, Transport, TransportBuilder};
