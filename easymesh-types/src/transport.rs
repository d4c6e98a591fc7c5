//! Contract between the peer layer and whatever transport carries its
//! messages.

use std::sync::Arc;

use crate::error::TransportError;
use crate::gossip::{GossipData, Gossiper};
use crate::membership::PeerDescription;
use crate::name::PeerName;

/// Settings a transport is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Listen host. Empty means no listener is started.
    pub host: String,
    pub port: u16,
    /// Shared key; must match network-wide or connections are refused.
    pub password: Vec<u8>,
    /// Maximum peer connections, 0 for unlimited.
    pub conn_limit: usize,
    /// Whether the transport may find and dial peers on its own.
    pub peer_discovery: bool,
    pub name: PeerName,
    pub nickname: String,
}

/// Creates transport handles.
pub trait TransportBuilder {
    fn create(&self, config: HostConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// A running transport handle.
pub trait Transport: Send + Sync {
    /// Start accepting connections on the configured host and port.
    ///
    /// Failures are logged by the transport, not reported.
    fn start_listening(&self);

    /// Route messages on channel `name` to `hook`, returning the endpoint
    /// used to send on that channel. Registering a name again replaces the
    /// previous hook.
    fn register_channel(&self, name: &str, hook: Arc<dyn Gossiper>) -> Box<dyn GossipSender>;

    /// Connect to every address, returning one error per failed address.
    ///
    /// When `replace_existing` is set the new list replaces the remembered
    /// connection targets instead of extending them.
    fn initiate_connections(&self, addrs: &[String], replace_existing: bool)
        -> Vec<TransportError>;

    /// The peers this transport currently knows about, including itself.
    fn peer_descriptions(&self) -> Vec<PeerDescription>;
}

/// Sending half of a registered channel.
pub trait GossipSender: Send + Sync {
    /// Hand `msg` to the transport for delivery to `dst`.
    fn gossip_unicast(&self, dst: PeerName, msg: &[u8]) -> Result<(), TransportError>;

    /// Hand `data` to the transport for delivery to every peer.
    fn gossip_broadcast(&self, data: &dyn GossipData);
}
