//! Easy-to-use peers on a gossip mesh.
//!
//! A [`Peer`] joins the mesh with a nickname and an optional explicit
//! [`PeerName`], sends unicast and broadcast messages, and hands every
//! received message to the handlers in its [`Config`]. Request/response
//! exchanges are built by the caller: handlers capture whatever channel the
//! caller wants replies delivered on.
//!
//! ```no_run
//! use easymesh::{Config, Peer};
//! use easymesh_relay::MemoryNetwork;
//!
//! let network = MemoryNetwork::new();
//! let config = Config::new("agent-1").with_on_message(|_peer, src, msg| {
//!     println!("{} says {}", src, String::from_utf8_lossy(msg));
//!     Ok(())
//! });
//! let (peer, errors) = Peer::new(config, &network).unwrap();
//! assert!(errors.is_empty());
//! peer.broadcast(b"hello");
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod peer;

pub use config::{Config, Handler};
pub use dispatcher::Dispatcher;
pub use error::PeerError;
pub use peer::{Peer, CHANNEL_NAME};

pub use easymesh_types::{
    GossipMessage, HandlerError, HandlerResult, Membership, PeerDescription, PeerName,
    PeerNameError, TransportError,
};
