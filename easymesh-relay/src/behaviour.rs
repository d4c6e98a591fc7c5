use easymesh_types::HostConfig;
use libp2p::gossipsub;
use libp2p::identity::Keypair;
use libp2p::mdns;
use libp2p::request_response;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::StreamProtocol;

use crate::codec::MeshCodec;
use crate::config::RelayConfig;
use crate::protocol::{agent_version, identify_protocol, DIRECT_PROTOCOL, GOSSIP_TRANSMIT_SIZE};

/// Combined network behaviour for a mesh peer.
#[derive(NetworkBehaviour)]
pub struct MeshBehaviour {
    /// Gossipsub for broadcast and state gossip.
    pub gossipsub: gossipsub::Behaviour,
    /// Request-response for unicast messages.
    pub request_response: request_response::Behaviour<MeshCodec>,
    /// Identify carries the mesh name, nickname and shared-key tag.
    pub identify: libp2p::identify::Behaviour,
    /// Local network discovery, only enabled with peer discovery.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Build a MeshBehaviour from a keypair.
///
/// Returns `Result<MeshBehaviour, Box<dyn Error + Send + Sync>>` to conform
/// to the `TryIntoBehaviour` trait expected by `SwarmBuilder::with_behaviour`.
pub fn build_behaviour(
    keypair: &Keypair,
    host: &HostConfig,
    config: &RelayConfig,
) -> Result<MeshBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    // --- Gossipsub ---
    // Messages are only forwarded once the local hook has seen them.
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(config.heartbeat_interval)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .validate_messages()
        .max_transmit_size(GOSSIP_TRANSMIT_SIZE)
        .build()
        .map_err(|e| format!("gossipsub config: {}", e))?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .map_err(|e| format!("gossipsub behaviour: {}", e))?;

    // --- Request-Response ---
    let rr_protocol = StreamProtocol::try_from_owned(DIRECT_PROTOCOL.to_string())
        .map_err(|e| format!("invalid protocol: {:?}", e))?;

    let request_response = request_response::Behaviour::with_codec(
        MeshCodec,
        [(rr_protocol, request_response::ProtocolSupport::Full)],
        request_response::Config::default(),
    );

    // --- Identify ---
    let identify = libp2p::identify::Behaviour::new(
        libp2p::identify::Config::new(identify_protocol(&host.password), keypair.public())
            .with_agent_version(agent_version(host.name, &host.nickname)),
    );

    // --- mDNS ---
    let mdns = if host.peer_discovery {
        let behaviour =
            mdns::tokio::Behaviour::new(mdns::Config::default(), keypair.public().to_peer_id())
                .map_err(|e| format!("mdns: {}", e))?;
        Some(behaviour)
    } else {
        None
    };

    Ok(MeshBehaviour {
        gossipsub,
        request_response,
        identify,
        mdns: Toggle::from(mdns),
    })
}
