use std::fmt;

use crate::name::PeerName;

/// Error a receive handler may hand back to the transport.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a receive handler, forwarded to the transport unchanged.
pub type HandlerResult = Result<(), HandlerError>;

/// Data the transport knows how to propagate between peers.
pub trait GossipData: Send + Sync + fmt::Debug {
    /// Opaque chunks to put on the wire.
    fn encode(&self) -> Vec<Vec<u8>>;

    /// Combine with other data into a new value; neither input changes.
    fn merge(&self, other: &dyn GossipData) -> Box<dyn GossipData>;
}

/// Concatenate every chunk of `data` into one buffer.
pub fn flatten(data: &dyn GossipData) -> Vec<u8> {
    data.encode().concat()
}

/// A broadcast payload.
///
/// Merging is plain concatenation with no deduplication and no size bound.
/// Nodes keep no gossip state, so a merge only happens while one broadcast
/// is forwarded; anything that merges repeatedly into a long-lived message
/// must bound the size itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GossipMessage(Vec<u8>);

impl GossipMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This message's bytes followed by every chunk of `other`.
    pub fn merged(&self, other: &dyn GossipData) -> GossipMessage {
        let mut bytes = self.0.clone();
        for chunk in other.encode() {
            bytes.extend_from_slice(&chunk);
        }
        GossipMessage(bytes)
    }
}

impl GossipData for GossipMessage {
    fn encode(&self) -> Vec<Vec<u8>> {
        vec![self.0.clone()]
    }

    fn merge(&self, other: &dyn GossipData) -> Box<dyn GossipData> {
        Box::new(self.merged(other))
    }
}

impl From<Vec<u8>> for GossipMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for GossipMessage {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// What a receive hook returns for a broadcast: the data the transport
/// should keep propagating, and the local handler's outcome.
#[derive(Debug)]
pub struct BroadcastOutcome {
    pub data: Box<dyn GossipData>,
    pub result: HandlerResult,
}

/// Receive hook a transport calls for one registered channel.
///
/// Transports call these from their own threads, possibly concurrently.
pub trait Gossiper: Send + Sync {
    /// A message addressed to this peer arrived from `src`.
    fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> HandlerResult;

    /// A broadcast arrived from `src`.
    fn on_gossip_broadcast(&self, src: PeerName, msg: &[u8]) -> BroadcastOutcome;

    /// Complete local state to gossip periodically, if any.
    fn gossip(&self) -> Option<Box<dyn GossipData>>;

    /// State gossip arrived. Returns the delta worth propagating further.
    fn on_gossip(&self, msg: &[u8]) -> Result<Option<Box<dyn GossipData>>, HandlerError>;
}
