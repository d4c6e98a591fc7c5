//! Bridges transport receive events to the handlers a peer was built with.

use std::sync::Weak;

use easymesh_types::{
    BroadcastOutcome, GossipData, GossipMessage, Gossiper, HandlerError, HandlerResult, PeerName,
};

use tracing::debug;

use crate::config::Handler;
use crate::peer::{Peer, PeerInner};

/// Receive hook registered on the peer's channel.
///
/// Holds the peer weakly so the transport's reference to the hook does not
/// keep the peer alive. Once the peer is gone, messages are dropped.
pub struct Dispatcher {
    peer: Weak<PeerInner>,
    on_message: Option<Handler>,
    on_broadcast: Option<Handler>,
}

impl Dispatcher {
    pub(crate) fn new(
        peer: Weak<PeerInner>,
        on_message: Option<Handler>,
        on_broadcast: Option<Handler>,
    ) -> Self {
        Self {
            peer,
            on_message,
            on_broadcast,
        }
    }

    fn handle(&self, handler: Option<&Handler>, src: PeerName, msg: &[u8]) -> HandlerResult {
        let Some(handler) = handler else {
            return Ok(());
        };
        let Some(inner) = self.peer.upgrade() else {
            debug!(%src, "peer gone, dropping message");
            return Ok(());
        };
        handler(&Peer::from_inner(inner), src, msg)
    }
}

impl Gossiper for Dispatcher {
    fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> HandlerResult {
        self.handle(self.on_message.as_ref(), src, msg)
    }

    fn on_gossip_broadcast(&self, src: PeerName, msg: &[u8]) -> BroadcastOutcome {
        BroadcastOutcome {
            data: Box::new(GossipMessage::from(msg)),
            result: self.handle(self.on_broadcast.as_ref(), src, msg),
        }
    }

    // No retained state: every message is a one-shot event.
    fn gossip(&self) -> Option<Box<dyn GossipData>> {
        None
    }

    fn on_gossip(&self, _msg: &[u8]) -> Result<Option<Box<dyn GossipData>>, HandlerError> {
        Ok(None)
    }
}
