use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use easymesh_types::gossip::flatten;
use easymesh_types::{
    GossipData, GossipSender, Gossiper, HostConfig, PeerDescription, PeerName, Transport,
    TransportBuilder, TransportError,
};
use tracing::{debug, warn};

/// An in-process network of transports.
///
/// Every transport created from the same network (or a clone of it) can
/// listen, connect and exchange messages with the others. Delivery is
/// synchronous: receive hooks run on the sender's thread before the send
/// returns. Used for tests and simulations.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    /// Listen address to the node listening on it.
    listeners: HashMap<String, PeerName>,
    nodes: HashMap<PeerName, Arc<MemoryNode>>,
    /// Undirected links, stored with the smaller name first.
    links: BTreeSet<(PeerName, PeerName)>,
}

struct MemoryNode {
    config: HostConfig,
    channels: RwLock<HashMap<String, Arc<dyn Gossiper>>>,
}

impl MemoryNode {
    fn hook(&self, channel: &str) -> Option<Arc<dyn Gossiper>> {
        self.channels.read().ok()?.get(channel).cloned()
    }
}

impl NetworkState {
    fn neighbours(&self, name: PeerName) -> Vec<PeerName> {
        self.links
            .iter()
            .filter_map(|&(a, b)| {
                if a == name {
                    Some(b)
                } else if b == name {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Every node reachable from `name`, including itself.
    fn component(&self, name: PeerName) -> HashSet<PeerName> {
        let mut seen = HashSet::from([name]);
        let mut queue = VecDeque::from([name]);
        while let Some(next) = queue.pop_front() {
            for peer in self.neighbours(next) {
                if seen.insert(peer) {
                    queue.push_back(peer);
                }
            }
        }
        seen
    }

    fn at_limit(&self, name: PeerName) -> bool {
        match self.nodes.get(&name) {
            Some(node) => {
                node.config.conn_limit != 0
                    && self.neighbours(name).len() >= node.config.conn_limit
            }
            None => true,
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live transports on this network.
    pub fn node_count(&self) -> usize {
        self.read().map(|state| state.nodes.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NetworkState>, TransportError> {
        self.state.read().map_err(|e| TransportError::Unavailable {
            reason: e.to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NetworkState>, TransportError> {
        self.state.write().map_err(|e| TransportError::Unavailable {
            reason: e.to_string(),
        })
    }

    fn node(&self, name: PeerName) -> Option<Arc<MemoryNode>> {
        self.read().ok()?.nodes.get(&name).cloned()
    }

    fn connect(&self, from: PeerName, addr: &str) -> Result<(), TransportError> {
        let failed = |reason: &str| TransportError::ConnectionFailed {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        let mut state = self.write()?;
        let to = *state
            .listeners
            .get(addr)
            .ok_or_else(|| failed("connection refused"))?;
        if to == from {
            return Err(failed("cannot connect to self"));
        }
        let link = (from.min(to), from.max(to));
        if state.links.contains(&link) {
            return Ok(());
        }

        let (Some(local), Some(remote)) = (state.nodes.get(&from), state.nodes.get(&to)) else {
            return Err(failed("node has gone away"));
        };
        if local.config.password != remote.config.password {
            return Err(failed("shared key mismatch"));
        }
        if state.at_limit(from) {
            return Err(failed("connection limit reached"));
        }
        if state.at_limit(to) {
            return Err(failed("remote connection limit reached"));
        }

        state.links.insert(link);
        debug!(%from, %to, "linked");
        Ok(())
    }
}

impl TransportBuilder for MemoryNetwork {
    fn create(&self, config: HostConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let name = config.name;
        let mut state = self.write()?;
        if state.nodes.contains_key(&name) {
            return Err(TransportError::NetworkError {
                reason: format!("name {} already in use", name),
            });
        }
        state.nodes.insert(
            name,
            Arc::new(MemoryNode {
                config,
                channels: RwLock::new(HashMap::new()),
            }),
        );
        Ok(Arc::new(MemoryTransport {
            name,
            network: self.clone(),
        }))
    }
}

/// Listen key for a host/port pair, in the same form `SocketAddr` displays.
fn listen_key(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}

/// One node on a [`MemoryNetwork`]. Leaves the network when dropped.
pub struct MemoryTransport {
    name: PeerName,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn start_listening(&self) {
        let Some(node) = self.network.node(self.name) else {
            return;
        };
        if node.config.host.is_empty() {
            debug!(name = %self.name, "no listen host configured");
            return;
        }
        let key = listen_key(&node.config.host, node.config.port);
        let mut state = match self.network.write() {
            Ok(state) => state,
            Err(e) => {
                warn!("cannot start listener: {}", e);
                return;
            }
        };
        match state.listeners.get(&key).copied() {
            Some(owner) if owner != self.name => {
                warn!(addr = %key, "address already in use");
            }
            _ => {
                state.listeners.insert(key.clone(), self.name);
                debug!(name = %self.name, addr = %key, "listening");
            }
        }
    }

    fn register_channel(&self, name: &str, hook: Arc<dyn Gossiper>) -> Box<dyn GossipSender> {
        match self.network.node(self.name) {
            Some(node) => match node.channels.write() {
                Ok(mut channels) => {
                    channels.insert(name.to_string(), hook);
                }
                Err(e) => warn!(channel = name, "cannot register channel: {}", e),
            },
            None => warn!(channel = name, "node has left the network"),
        }
        Box::new(MemoryChannel {
            channel: name.to_string(),
            local: self.name,
            network: self.network.clone(),
        })
    }

    // Links last as long as both ends live, so replacing targets has
    // nothing to forget.
    fn initiate_connections(
        &self,
        addrs: &[String],
        _replace_existing: bool,
    ) -> Vec<TransportError> {
        addrs
            .iter()
            .filter_map(|addr| self.network.connect(self.name, addr).err())
            .collect()
    }

    fn peer_descriptions(&self) -> Vec<PeerDescription> {
        let Ok(state) = self.network.read() else {
            return Vec::new();
        };
        let mut peers: Vec<PeerDescription> = state
            .component(self.name)
            .into_iter()
            .filter_map(|name| state.nodes.get(&name))
            .map(|node| PeerDescription {
                name: node.config.name,
                nickname: node.config.nickname.clone(),
                is_self: node.config.name == self.name,
            })
            .collect();
        peers.sort_by_key(|d| d.name);
        peers
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Ok(mut state) = self.network.write() {
            let name = self.name;
            state.nodes.remove(&name);
            state.listeners.retain(|_, owner| *owner != name);
            state.links.retain(|&(a, b)| a != name && b != name);
            debug!(%name, "left network");
        }
    }
}

/// Sending half of a channel on a [`MemoryTransport`].
struct MemoryChannel {
    channel: String,
    local: PeerName,
    network: MemoryNetwork,
}

impl GossipSender for MemoryChannel {
    fn gossip_unicast(&self, dst: PeerName, msg: &[u8]) -> Result<(), TransportError> {
        let node = {
            let state = self.network.read()?;
            if dst == self.local || !state.component(self.local).contains(&dst) {
                return Err(TransportError::UnknownPeer { name: dst });
            }
            state.nodes.get(&dst).cloned()
        };
        let Some(hook) = node.and_then(|node| node.hook(&self.channel)) else {
            debug!(%dst, channel = %self.channel, "no hook registered for channel");
            return Ok(());
        };
        if let Err(e) = hook.on_gossip_unicast(self.local, msg) {
            warn!(%dst, src = %self.local, "unicast handler failed: {}", e);
        }
        Ok(())
    }

    fn gossip_broadcast(&self, data: &dyn GossipData) {
        let origin = self.local;
        let mut visited = HashSet::from([origin]);
        let mut queue: VecDeque<(PeerName, Vec<u8>)> = VecDeque::new();

        let payload = flatten(data);
        for next in self.neighbours(origin) {
            if visited.insert(next) {
                queue.push_back((next, payload.clone()));
            }
        }

        while let Some((name, payload)) = queue.pop_front() {
            let hook = self
                .network
                .node(name)
                .and_then(|node| node.hook(&self.channel));
            let forward = match hook {
                Some(hook) => {
                    let outcome = hook.on_gossip_broadcast(origin, &payload);
                    if let Err(e) = outcome.result {
                        warn!(dst = %name, src = %origin, "broadcast handler failed: {}", e);
                    }
                    flatten(&*outcome.data)
                }
                None => payload,
            };
            for next in self.neighbours(name) {
                if visited.insert(next) {
                    queue.push_back((next, forward.clone()));
                }
            }
        }
    }
}

impl MemoryChannel {
    fn neighbours(&self, name: PeerName) -> Vec<PeerName> {
        self.network
            .read()
            .map(|state| state.neighbours(name))
            .unwrap_or_default()
    }
}
