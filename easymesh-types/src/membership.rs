use serde::{Deserialize, Serialize};

use crate::name::PeerName;

/// One peer as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescription {
    pub name: PeerName,
    pub nickname: String,
    /// True for the local peer.
    pub is_self: bool,
}

/// Point-in-time view of the peers a transport knows about.
///
/// Lookups scan linearly and never cache; take a fresh snapshot to see
/// newer membership. Nicknames need not be unique, the first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    peers: Vec<PeerDescription>,
}

impl Membership {
    pub fn new(peers: Vec<PeerDescription>) -> Self {
        Self { peers }
    }

    /// Name of the first peer with the given nickname.
    pub fn name_for_nickname(&self, nickname: &str) -> Option<PeerName> {
        self.peers
            .iter()
            .find(|p| p.nickname == nickname)
            .map(|p| p.name)
    }

    /// Nickname of the first peer with the given name.
    pub fn nickname_for_name(&self, name: PeerName) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.nickname.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerDescription> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl From<Vec<PeerDescription>> for Membership {
    fn from(peers: Vec<PeerDescription>) -> Self {
        Self::new(peers)
    }
}

impl IntoIterator for Membership {
    type Item = PeerDescription;
    type IntoIter = std::vec::IntoIter<PeerDescription>;

    fn into_iter(self) -> Self::IntoIter {
        self.peers.into_iter()
    }
}
