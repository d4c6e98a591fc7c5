use easymesh_types::{PeerDescription, PeerName};
use libp2p::PeerId;
use std::collections::HashMap;

/// Information about a connected peer.
pub struct PeerInfo {
    /// The libp2p peer ID.
    pub peer_id: PeerId,
    /// Name and nickname, set once the peer identifies itself.
    pub identity: Option<(PeerName, String)>,
    /// When this peer connected.
    pub connected_at: std::time::Instant,
}

/// Tracks connected peers and their mesh names.
pub struct PeerManager {
    peers: HashMap<PeerId, PeerInfo>,
    name_to_peer: HashMap<PeerName, PeerId>,
    /// 0 means unlimited.
    max_connections: usize,
}

impl PeerManager {
    /// Create a new PeerManager with a maximum connection limit (0 = unlimited).
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: HashMap::new(),
            name_to_peer: HashMap::new(),
            max_connections,
        }
    }

    /// Add a peer. Returns false if the connection limit is reached.
    /// Adding a peer that is already tracked always succeeds.
    pub fn add_peer(&mut self, peer_id: PeerId) -> bool {
        if self.peers.contains_key(&peer_id) {
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.peers.insert(
            peer_id,
            PeerInfo {
                peer_id,
                identity: None,
                connected_at: std::time::Instant::now(),
            },
        );
        true
    }

    /// Remove a peer and its name mapping.
    pub fn remove_peer(&mut self, peer_id: &PeerId) {
        if let Some(info) = self.peers.remove(peer_id) {
            if let Some((name, _)) = info.identity {
                if self.name_to_peer.get(&name) == Some(peer_id) {
                    self.name_to_peer.remove(&name);
                }
            }
        }
    }

    /// Record the name and nickname a connected peer announced.
    pub fn identify(&mut self, peer_id: &PeerId, name: PeerName, nickname: String) -> bool {
        if let Some(info) = self.peers.get_mut(peer_id) {
            // Remove old mapping if there was a previous name.
            if let Some((old, _)) = info.identity.take() {
                self.name_to_peer.remove(&old);
            }
            info.identity = Some((name, nickname));
            self.name_to_peer.insert(name, *peer_id);
            true
        } else {
            false
        }
    }

    /// Look up a PeerId by mesh name.
    pub fn peer_for_name(&self, name: &PeerName) -> Option<&PeerId> {
        self.name_to_peer.get(name)
    }

    /// The mesh name a connected peer identified with.
    pub fn name_of(&self, peer_id: &PeerId) -> Option<PeerName> {
        self.peers
            .get(peer_id)
            .and_then(|info| info.identity.as_ref())
            .map(|(name, _)| *name)
    }

    /// Whether the peer manager has reached its connection limit.
    pub fn is_full(&self) -> bool {
        self.max_connections != 0 && self.peers.len() >= self.max_connections
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Iterator over the peer IDs of all connected peers.
    pub fn connected_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// Descriptions of every identified peer, ordered by name.
    pub fn descriptions(&self) -> Vec<PeerDescription> {
        let mut out: Vec<PeerDescription> = self
            .peers
            .values()
            .filter_map(|info| info.identity.as_ref())
            .map(|(name, nickname)| PeerDescription {
                name: *name,
                nickname: nickname.clone(),
                is_self: false,
            })
            .collect();
        out.sort_by_key(|d| d.name);
        out
    }
}
