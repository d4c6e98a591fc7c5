use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use easymesh_relay::RelayBuilder;
use easymesh_types::{
    GossipMessage, GossipSender, HostConfig, Membership, PeerName, Transport, TransportBuilder,
    TransportError,
};
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::PeerError;

/// Channel every peer sends and receives on.
pub const CHANNEL_NAME: &str = "defaultchannel";

/// The local node's handle into the mesh.
///
/// Cloning is cheap; clones share the same transport and handlers. The
/// transport keeps running for as long as any clone is alive.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

pub(crate) struct PeerInner {
    name: PeerName,
    nickname: String,
    transport: Arc<dyn Transport>,
    sender: Box<dyn GossipSender>,
}

impl Peer {
    /// Join the mesh.
    ///
    /// Besides the peer, returns one error for each initial peer that could
    /// not be reached; if there are fewer errors than initial peers, at least
    /// one connection succeeded. Even when every initial connection failed,
    /// [`Peer::connect`] can be used to try more.
    ///
    /// Whether the listener started is not reported; failures are logged by
    /// the transport.
    pub fn new(
        config: Config,
        builder: &dyn TransportBuilder,
    ) -> Result<(Peer, Vec<TransportError>), PeerError> {
        if config.nickname.is_empty() {
            return Err(PeerError::ConfigError {
                reason: "no nickname".to_string(),
            });
        }
        let name = config
            .name
            .unwrap_or_else(|| PeerName::from_string_hash(&config.nickname));
        let conn_limit = usize::try_from(config.conn_limit.max(0)).unwrap_or(usize::MAX);

        let transport = builder.create(HostConfig {
            host: config.address.clone(),
            port: config.port,
            password: config.key.clone(),
            conn_limit,
            peer_discovery: config.auto_connect,
            name,
            nickname: config.nickname.clone(),
        })?;

        let on_message = config.on_message.clone();
        let on_broadcast = config.on_broadcast.clone();
        let inner = Arc::new_cyclic(|weak| {
            let dispatcher = Dispatcher::new(weak.clone(), on_message, on_broadcast);
            let sender = transport.register_channel(CHANNEL_NAME, Arc::new(dispatcher));
            PeerInner {
                name,
                nickname: config.nickname.clone(),
                transport: transport.clone(),
                sender,
            }
        });
        let peer = Peer { inner };

        if !config.address.is_empty() {
            transport.start_listening();
        }

        let errors = peer.connect(&config.initial_peers);
        info!(
            %name,
            nickname = %config.nickname,
            initial_peers = config.initial_peers.len(),
            failed = errors.len(),
            "peer started"
        );
        Ok((peer, errors))
    }

    /// Join the mesh over libp2p. Must be called within a tokio runtime.
    pub fn join(config: Config) -> Result<(Peer, Vec<TransportError>), PeerError> {
        Self::new(config, &RelayBuilder::default())
    }

    /// Send a message to one peer.
    pub fn send(&self, dst: PeerName, msg: &[u8]) -> Result<(), TransportError> {
        self.inner.sender.gossip_unicast(dst, msg).map_err(|e| {
            debug!(%dst, "send failed: {}", e);
            e
        })
    }

    /// Send a message to every peer in the mesh.
    pub fn broadcast(&self, msg: &[u8]) {
        self.inner
            .sender
            .gossip_broadcast(&GossipMessage::from(msg));
    }

    /// Connect to more peers, returning one error per failed address.
    pub fn connect(&self, addrs: &[SocketAddr]) -> Vec<TransportError> {
        if addrs.is_empty() {
            return Vec::new();
        }
        let addrs: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
        self.inner.transport.initiate_connections(&addrs, false)
    }

    /// Current snapshot of the peers the transport knows about.
    pub fn membership(&self) -> Membership {
        Membership::new(self.inner.transport.peer_descriptions())
    }

    pub fn peer_name_from_nickname(&self, nickname: &str) -> Option<PeerName> {
        self.membership().name_for_nickname(nickname)
    }

    pub fn nickname_from_peer_name(&self, name: PeerName) -> Option<String> {
        self.membership().nickname_for_name(name).map(str::to_string)
    }

    pub fn name(&self) -> PeerName {
        self.inner.name
    }

    pub fn nickname(&self) -> &str {
        &self.inner.nickname
    }

    /// The underlying transport handle.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn from_inner(inner: Arc<PeerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<PeerInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.inner.name)
            .field("nickname", &self.inner.nickname)
            .finish()
    }
}
