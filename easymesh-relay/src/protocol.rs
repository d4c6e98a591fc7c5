use easymesh_types::PeerName;

/// Wire protocol version. Bump this whenever a breaking change is made to
/// `Frame` or any other borsh-serialized P2P type.
pub const PROTOCOL_VERSION: u8 = 2;

/// Largest frame accepted on either the direct or the gossip path.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Gossipsub RPC size limit: a full frame plus its length prefix, topic and
/// signature.
pub const GOSSIP_TRANSMIT_SIZE: usize = MAX_MESSAGE_SIZE + 64 * 1024;

/// Direct (unicast) message protocol.
pub const DIRECT_PROTOCOL: &str = "/easymesh/direct/1.0.0";

/// Prefix of the agent string peers announce over identify.
pub const AGENT_PREFIX: &str = "easymesh";

/// KDF context for the shared-key tag.
const KEY_TAG_CONTEXT: &str = "easymesh shared key tag v1";

/// Gossipsub topic carrying one logical channel.
pub fn channel_topic(channel: &str) -> String {
    format!("easymesh/{}/v{}", channel, PROTOCOL_VERSION)
}

/// Identify protocol string. Peers holding a different shared key announce
/// a different string, which is how mismatched keys are detected.
pub fn identify_protocol(password: &[u8]) -> String {
    format!("/easymesh/{}/{}", PROTOCOL_VERSION, key_tag(password))
}

/// Short, non-reversible tag of the shared key.
pub fn key_tag(password: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KEY_TAG_CONTEXT);
    hasher.update(password);
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

/// Agent string carrying our name and nickname:
/// `easymesh/<name as 16 hex digits>/<nickname>`.
///
/// The full 64-bit value is sent so names derived from a hash keep their
/// high bits.
pub fn agent_version(name: PeerName, nickname: &str) -> String {
    format!("{}/{:016x}/{}", AGENT_PREFIX, name.as_u64(), nickname)
}

/// Reverse of [`agent_version`]. The nickname may itself contain `/`.
pub fn parse_agent_version(agent: &str) -> Option<(PeerName, String)> {
    let rest = agent.strip_prefix(AGENT_PREFIX)?.strip_prefix('/')?;
    let (name, nickname) = rest.split_once('/')?;
    if name.len() != 16 {
        return None;
    }
    let raw = u64::from_str_radix(name, 16).ok()?;
    Some((PeerName::new(raw), nickname.to_string()))
}
