//! Transports for easymesh.
//!
//! A libp2p transport built on gossipsub for broadcast and state gossip,
//! request-response for unicast, identify for exchanging mesh names, and
//! mDNS for local discovery. Also an in-memory network for tests and
//! simulations.

pub mod behaviour;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod memory;
pub mod peer_manager;
pub mod protocol;
pub mod relay;

pub use config::RelayConfig;
pub use error::RelayError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use relay::{RelayBuilder, RelayTransport};
