use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use easymesh_types::gossip::flatten;
use easymesh_types::{
    GossipData, GossipSender, Gossiper, HostConfig, PeerDescription, PeerName, Transport,
    TransportBuilder, TransportError,
};
use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, MessageAcceptance, MessageId};
use libp2p::request_response::{self, ResponseChannel};
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, mdns, Multiaddr, PeerId, Swarm, SwarmBuilder};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::behaviour::{build_behaviour, MeshBehaviour, MeshBehaviourEvent};
use crate::codec::{self, Ack, Frame, FrameKind};
use crate::config::RelayConfig;
use crate::discovery::{listen_multiaddr, parse_target};
use crate::error::RelayError;
use crate::peer_manager::PeerManager;
use crate::protocol::{channel_topic, identify_protocol, parse_agent_version};

/// Creates libp2p-backed transports.
#[derive(Debug, Clone, Default)]
pub struct RelayBuilder {
    config: RelayConfig,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }
}

impl TransportBuilder for RelayBuilder {
    fn create(&self, host: HostConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = RelayTransport::spawn(host, self.config.clone())?;
        Ok(Arc::new(transport))
    }
}

/// Work handed to the swarm driver by transport handles.
enum Command {
    Listen(Multiaddr),
    Connect {
        targets: Vec<Multiaddr>,
        replace: bool,
    },
    Subscribe {
        channel: String,
    },
    Publish {
        channel: String,
        frame: Frame,
    },
    Unicast {
        peer: PeerId,
        frame: Frame,
    },
}

/// Results posted back to the driver by hooks running on the blocking pool.
enum Completion {
    Respond {
        channel: ResponseChannel<Ack>,
        ack: Ack,
    },
    Validated {
        message_id: MessageId,
        source: PeerId,
        acceptance: MessageAcceptance,
    },
    Publish {
        channel: String,
        frame: Frame,
    },
}

/// State read by transport handles and written by the driver.
struct Shared {
    peers: RwLock<PeerManager>,
    hooks: RwLock<HashMap<String, Arc<dyn Gossiper>>>,
}

impl Shared {
    fn new(conn_limit: usize) -> Self {
        Self {
            peers: RwLock::new(PeerManager::new(conn_limit)),
            hooks: RwLock::new(HashMap::new()),
        }
    }

    fn hook(&self, channel: &str) -> Option<Arc<dyn Gossiper>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }

    fn all_hooks(&self) -> Vec<(String, Arc<dyn Gossiper>)> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, hook)| (name.clone(), hook.clone()))
            .collect()
    }
}

/// A transport carried by a libp2p swarm.
///
/// The swarm runs on its own task; this handle only queues work for it and
/// reads the shared peer table.
pub struct RelayTransport {
    host: HostConfig,
    local_peer_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl RelayTransport {
    /// Build the swarm and spawn its driver on the current tokio runtime.
    pub fn spawn(host: HostConfig, config: RelayConfig) -> Result<Self, RelayError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| RelayError::NetworkError {
                reason: format!("no tokio runtime: {}", e),
            })?;
        let _guard = runtime.enter();

        let swarm = build_swarm(&host, &config)?;
        let local_peer_id = *swarm.local_peer_id();

        let shared = Arc::new(Shared::new(host.conn_limit));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let driver = SwarmDriver::new(swarm, &host, &config, shared.clone(), command_rx);
        runtime.spawn(driver.run());

        info!(
            peer_id = %local_peer_id,
            name = %host.name,
            nickname = %host.nickname,
            "relay transport started"
        );

        Ok(Self {
            host,
            local_peer_id,
            commands,
            shared,
        })
    }

    /// Get the local peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn submit(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::Unavailable {
                reason: "swarm driver stopped".to_string(),
            })
    }
}

impl Transport for RelayTransport {
    fn start_listening(&self) {
        if self.host.host.is_empty() {
            debug!("no listen host configured");
            return;
        }
        match listen_multiaddr(&self.host.host, self.host.port) {
            Ok(addr) => {
                if let Err(e) = self.submit(Command::Listen(addr)) {
                    warn!("cannot start listener: {}", e);
                }
            }
            Err(e) => warn!("cannot start listener: {}", e),
        }
    }

    fn register_channel(&self, name: &str, hook: Arc<dyn Gossiper>) -> Box<dyn GossipSender> {
        self.shared
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), hook);
        if let Err(e) = self.submit(Command::Subscribe {
            channel: name.to_string(),
        }) {
            warn!(channel = name, "cannot subscribe: {}", e);
        }
        Box::new(RelayChannel {
            channel: name.to_string(),
            local_name: self.host.name,
            commands: self.commands.clone(),
            shared: self.shared.clone(),
        })
    }

    fn initiate_connections(
        &self,
        addrs: &[String],
        replace_existing: bool,
    ) -> Vec<TransportError> {
        let mut errors = Vec::new();
        let mut targets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match parse_target(addr) {
                Ok(target) => targets.push(target),
                Err(e) => errors.push(e),
            }
        }

        let count = targets.len();
        if let Err(e) = self.submit(Command::Connect {
            targets,
            replace: replace_existing,
        }) {
            errors.extend(std::iter::repeat(e).take(count));
        }
        errors
    }

    fn peer_descriptions(&self) -> Vec<PeerDescription> {
        let mut peers = self
            .shared
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptions();
        peers.push(PeerDescription {
            name: self.host.name,
            nickname: self.host.nickname.clone(),
            is_self: true,
        });
        peers.sort_by_key(|d| d.name);
        peers
    }
}

/// Build the swarm: TCP with noise and yamux, DNS, and the mesh behaviour.
/// Must be called within a tokio runtime.
fn build_swarm(
    host: &HostConfig,
    config: &RelayConfig,
) -> Result<Swarm<MeshBehaviour>, RelayError> {
    let keypair = if let Some(seed) = &config.keypair_seed {
        let mut seed_bytes = *seed;
        libp2p::identity::Keypair::ed25519_from_bytes(&mut seed_bytes).map_err(|e| {
            RelayError::NetworkError {
                reason: format!("invalid keypair seed: {}", e),
            }
        })?
    } else {
        libp2p::identity::Keypair::generate_ed25519()
    };
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default(),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )
        .map_err(|e| RelayError::NetworkError {
            reason: format!("tcp transport: {}", e),
        })?
        .with_dns()
        .map_err(|e| RelayError::NetworkError {
            reason: format!("dns transport: {}", e),
        })?
        .with_behaviour(|key| build_behaviour(key, host, config))
        .map_err(|e| RelayError::NetworkError {
            reason: format!("behaviour: {}", e),
        })?
        .with_swarm_config(|cfg| {
            cfg.with_idle_connection_timeout(config.idle_connection_timeout)
        })
        .build();
    Ok(swarm)
}

/// Sending half of one registered channel.
struct RelayChannel {
    channel: String,
    local_name: PeerName,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl RelayChannel {
    fn frame(&self, kind: FrameKind, payload: Vec<u8>) -> Frame {
        Frame {
            kind,
            channel: self.channel.clone(),
            src: self.local_name.as_u64(),
            payload,
        }
    }
}

impl GossipSender for RelayChannel {
    fn gossip_unicast(&self, dst: PeerName, msg: &[u8]) -> Result<(), TransportError> {
        let frame = self.frame(FrameKind::Unicast, msg.to_vec());
        codec::ensure_fits(&frame)?;

        let peer = self
            .shared
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .peer_for_name(&dst)
            .copied()
            .ok_or(TransportError::UnknownPeer { name: dst })?;

        self.commands
            .send(Command::Unicast { peer, frame })
            .map_err(|_| TransportError::Unavailable {
                reason: "swarm driver stopped".to_string(),
            })
    }

    fn gossip_broadcast(&self, data: &dyn GossipData) {
        let frame = self.frame(FrameKind::Broadcast, flatten(data));
        let channel = self.channel.clone();
        if self.commands.send(Command::Publish { channel, frame }).is_err() {
            warn!(channel = %self.channel, "swarm driver stopped, broadcast dropped");
        }
    }
}

/// Owns the swarm and processes its events along with queued work.
struct SwarmDriver {
    swarm: Swarm<MeshBehaviour>,
    local_name: PeerName,
    identify_protocol: String,
    conn_limit: usize,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    /// Remembered connection targets and the peer each last reached.
    targets: HashMap<Multiaddr, Option<PeerId>>,
    redial_interval: Duration,
}

impl SwarmDriver {
    fn new(
        swarm: Swarm<MeshBehaviour>,
        host: &HostConfig,
        config: &RelayConfig,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            swarm,
            local_name: host.name,
            identify_protocol: identify_protocol(&host.password),
            conn_limit: host.conn_limit,
            shared,
            commands,
            completions_tx,
            completions,
            targets: HashMap::new(),
            redial_interval: config.redial_interval,
        }
    }

    /// Main event loop. Ends once every transport handle is dropped.
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.redial_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("transport dropped, stopping swarm driver");
                        return;
                    }
                },
                Some(done) = self.completions.recv() => self.handle_completion(done),
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                _ = tick.tick() => {
                    self.redial();
                    self.gossip_state();
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Listen(addr) => {
                if let Err(e) = self.swarm.listen_on(addr.clone()) {
                    warn!(%addr, "listen failed: {}", e);
                }
            }
            Command::Connect { targets, replace } => {
                if replace {
                    self.targets.clear();
                }
                for addr in targets {
                    self.targets.entry(addr.clone()).or_insert(None);
                    self.dial(addr);
                }
            }
            Command::Subscribe { channel } => {
                let topic = IdentTopic::new(channel_topic(&channel));
                if let Err(e) = self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    warn!(%channel, "subscribe failed: {}", e);
                }
            }
            Command::Publish { channel, frame } => self.publish(&channel, frame),
            Command::Unicast { peer, frame } => {
                self.swarm
                    .behaviour_mut()
                    .request_response
                    .send_request(&peer, frame);
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Respond { channel, ack } => {
                if self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, ack)
                    .is_err()
                {
                    debug!("unicast sender went away before the reply");
                }
            }
            Completion::Validated {
                message_id,
                source,
                acceptance,
            } => {
                let outcome = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .report_message_validation_result(&message_id, &source, acceptance);
                debug!(%message_id, ?outcome, "reported validation result");
            }
            Completion::Publish { channel, frame } => self.publish(&channel, frame),
        }
    }

    fn publish(&mut self, channel: &str, frame: Frame) {
        let data = match codec::encode(&frame) {
            Ok(data) => data,
            Err(e) => {
                warn!(%channel, "cannot encode frame: {}", e);
                return;
            }
        };
        let topic = IdentTopic::new(channel_topic(channel));
        match self.swarm.behaviour_mut().gossipsub.publish(topic, data) {
            Ok(_) => {}
            Err(gossipsub::PublishError::InsufficientPeers) => {
                debug!(%channel, "no peers to publish to");
            }
            Err(e) => warn!(%channel, "publish failed: {}", e),
        }
    }

    fn dial(&mut self, addr: Multiaddr) {
        if let Err(e) = self.swarm.dial(addr.clone()) {
            warn!(%addr, "dial failed: {}", e);
        }
    }

    /// Remembered targets without a live connection.
    fn pending_targets(&self) -> Vec<Multiaddr> {
        self.targets
            .iter()
            .filter(|(_, peer)| match peer {
                Some(peer) => !self.swarm.is_connected(peer),
                None => true,
            })
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Dial every remembered target that is not connected.
    fn redial(&mut self) {
        for addr in self.pending_targets() {
            debug!(%addr, "redialing target");
            self.dial(addr);
        }
    }

    /// Ask every hook for its complete state and publish what it returns.
    fn gossip_state(&mut self) {
        for (channel, hook) in self.shared.all_hooks() {
            let completions = self.completions_tx.clone();
            let src = self.local_name.as_u64();
            tokio::task::spawn_blocking(move || {
                if let Some(state) = hook.gossip() {
                    let frame = Frame {
                        kind: FrameKind::State,
                        channel: channel.clone(),
                        src,
                        payload: flatten(&*state),
                    };
                    let _ = completions.send(Completion::Publish { channel, frame });
                }
            });
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<MeshBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(%peer_id, ?endpoint, "connection established");
                if endpoint.is_dialer() {
                    if let Some(slot) = self.targets.get_mut(endpoint.get_remote_address()) {
                        *slot = Some(peer_id);
                    }
                }
                let added = self
                    .shared
                    .peers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .add_peer(peer_id);
                if !added {
                    warn!(
                        %peer_id,
                        max = self.conn_limit,
                        "peer limit reached, disconnecting peer"
                    );
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(%peer_id, ?cause, "connection closed");
                if num_established == 0 {
                    let name = {
                        let mut peers = self
                            .shared
                            .peers
                            .write()
                            .unwrap_or_else(PoisonError::into_inner);
                        let name = peers.name_of(&peer_id);
                        peers.remove_peer(&peer_id);
                        name
                    };
                    if let Some(name) = name {
                        info!(%peer_id, %name, "peer left");
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, "outgoing connection failed: {}", error);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening on new address");
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!("listener error: {}", error);
            }
            other => {
                debug!(?other, "other swarm event");
            }
        }
    }

    fn handle_behaviour_event(&mut self, event: MeshBehaviourEvent) {
        match event {
            MeshBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message_id,
                message,
            }) => self.on_gossip_message(propagation_source, message_id, &message.data),
            MeshBehaviourEvent::RequestResponse(request_response::Event::Message {
                peer,
                message,
                ..
            }) => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => self.on_unicast(peer, request, channel),
                request_response::Message::Response { response, .. } => {
                    if let Some(error) = response.error {
                        debug!(%peer, %error, "remote handler reported an error");
                    }
                }
            },
            MeshBehaviourEvent::RequestResponse(request_response::Event::OutboundFailure {
                peer,
                error,
                ..
            }) => {
                warn!(%peer, "unicast delivery failed: {}", error);
            }
            MeshBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                self.on_identified(peer_id, info);
            }
            MeshBehaviourEvent::Mdns(mdns::Event::Discovered(found)) => {
                for (peer_id, addr) in found {
                    debug!(%peer_id, %addr, "discovered peer");
                    let opts = DialOpts::peer_id(peer_id)
                        .addresses(vec![addr])
                        .condition(PeerCondition::Disconnected)
                        .build();
                    if let Err(e) = self.swarm.dial(opts) {
                        debug!(%peer_id, "dial discovered peer failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_identified(&mut self, peer_id: PeerId, info: identify::Info) {
        debug!(
            %peer_id,
            protocol = %info.protocol_version,
            agent = %info.agent_version,
            "identified peer"
        );

        if info.protocol_version != self.identify_protocol {
            warn!(%peer_id, "peer uses another shared key or protocol version, disconnecting");
            let _ = self.swarm.disconnect_peer_id(peer_id);
            return;
        }

        let Some((name, nickname)) = parse_agent_version(&info.agent_version) else {
            warn!(%peer_id, agent = %info.agent_version, "peer is not a mesh node, disconnecting");
            let _ = self.swarm.disconnect_peer_id(peer_id);
            return;
        };

        if name == self.local_name {
            warn!(%peer_id, %name, "peer claims our own name, disconnecting");
            let _ = self.swarm.disconnect_peer_id(peer_id);
            return;
        }

        let known = self
            .shared
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .identify(&peer_id, name, nickname.clone());
        if known {
            info!(%peer_id, %name, %nickname, "peer joined");
        }
    }

    fn on_gossip_message(&mut self, source: PeerId, message_id: MessageId, data: &[u8]) {
        let frame: Frame = match codec::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%source, "rejecting undecodable gossip: {}", e);
                self.handle_completion(Completion::Validated {
                    message_id,
                    source,
                    acceptance: MessageAcceptance::Reject,
                });
                return;
            }
        };

        let Some(hook) = self.shared.hook(&frame.channel) else {
            debug!(channel = %frame.channel, "no hook registered for channel");
            self.handle_completion(Completion::Validated {
                message_id,
                source,
                acceptance: MessageAcceptance::Ignore,
            });
            return;
        };

        let completions = self.completions_tx.clone();
        tokio::task::spawn_blocking(move || {
            let src = PeerName::new(frame.src);
            let acceptance = match frame.kind {
                FrameKind::Broadcast => {
                    // Gossipsub relays the original message once accepted.
                    let outcome = hook.on_gossip_broadcast(src, &frame.payload);
                    if let Err(e) = outcome.result {
                        warn!(%src, "broadcast handler failed: {}", e);
                    }
                    MessageAcceptance::Accept
                }
                FrameKind::State => match hook.on_gossip(&frame.payload) {
                    Ok(Some(_)) => MessageAcceptance::Accept,
                    Ok(None) => MessageAcceptance::Ignore,
                    Err(e) => {
                        warn!(%src, "state handler failed: {}", e);
                        MessageAcceptance::Ignore
                    }
                },
                FrameKind::Unicast => MessageAcceptance::Reject,
            };
            let _ = completions.send(Completion::Validated {
                message_id,
                source,
                acceptance,
            });
        });
    }

    fn on_unicast(&mut self, peer: PeerId, frame: Frame, channel: ResponseChannel<Ack>) {
        let src = self
            .shared
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .name_of(&peer);
        let Some(src) = src else {
            debug!(%peer, "unicast from unidentified peer");
            self.refuse(channel, "sender not identified".to_string());
            return;
        };
        if frame.kind != FrameKind::Unicast {
            self.refuse(channel, "expected a unicast frame".to_string());
            return;
        }
        let Some(hook) = self.shared.hook(&frame.channel) else {
            self.refuse(channel, format!("no channel {}", frame.channel));
            return;
        };

        let completions = self.completions_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = hook.on_gossip_unicast(src, &frame.payload);
            let ack = Ack {
                error: result.err().map(|e| e.to_string()),
            };
            let _ = completions.send(Completion::Respond { channel, ack });
        });
    }

    fn refuse(&mut self, channel: ResponseChannel<Ack>, reason: String) {
        let ack = Ack {
            error: Some(reason),
        };
        self.handle_completion(Completion::Respond { channel, ack });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_MESSAGE_SIZE;
    use easymesh_types::{BroadcastOutcome, GossipMessage, HandlerError, HandlerResult};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;

    type Received = std_mpsc::Receiver<(PeerName, Vec<u8>)>;

    struct Recorder {
        unicasts: Mutex<std_mpsc::Sender<(PeerName, Vec<u8>)>>,
        broadcasts: Mutex<std_mpsc::Sender<(PeerName, Vec<u8>)>>,
    }

    impl Gossiper for Recorder {
        fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> HandlerResult {
            let _ = self.unicasts.lock().unwrap().send((src, msg.to_vec()));
            Ok(())
        }

        fn on_gossip_broadcast(&self, src: PeerName, msg: &[u8]) -> BroadcastOutcome {
            let _ = self.broadcasts.lock().unwrap().send((src, msg.to_vec()));
            BroadcastOutcome {
                data: Box::new(GossipMessage::from(msg)),
                result: Ok(()),
            }
        }

        fn gossip(&self) -> Option<Box<dyn GossipData>> {
            None
        }

        fn on_gossip(&self, _msg: &[u8]) -> Result<Option<Box<dyn GossipData>>, HandlerError> {
            Ok(None)
        }
    }

    /// A hook plus the unicast and broadcast streams it saw.
    fn recorder() -> (Arc<Recorder>, Received, Received) {
        let (unicast_tx, unicast_rx) = std_mpsc::channel();
        let (broadcast_tx, broadcast_rx) = std_mpsc::channel();
        (
            Arc::new(Recorder {
                unicasts: Mutex::new(unicast_tx),
                broadcasts: Mutex::new(broadcast_tx),
            }),
            unicast_rx,
            broadcast_rx,
        )
    }

    fn host_config(nickname: &str, port: u16) -> HostConfig {
        HostConfig {
            host: "127.0.0.1".to_string(),
            port,
            password: b"kittens".to_vec(),
            conn_limit: 0,
            peer_discovery: false,
            name: PeerName::from_string_hash(nickname),
            nickname: nickname.to_string(),
        }
    }

    /// A driver that is never run, for poking at its command handling.
    fn idle_driver(nickname: &str) -> SwarmDriver {
        let host = host_config(nickname, 0);
        let config = RelayConfig::default();
        let swarm = build_swarm(&host, &config).unwrap();
        let (_commands, command_rx) = mpsc::unbounded_channel();
        SwarmDriver::new(
            swarm,
            &host,
            &config,
            Arc::new(Shared::new(host.conn_limit)),
            command_rx,
        )
    }

    fn tcp_target(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap()
    }

    fn sorted_targets(driver: &SwarmDriver) -> Vec<Multiaddr> {
        let mut targets: Vec<Multiaddr> = driver.targets.keys().cloned().collect();
        targets.sort_by_key(|a| a.to_string());
        targets
    }

    async fn wait_for_members(transport: &Arc<dyn Transport>, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while transport.peer_descriptions().len() < count {
            assert!(tokio::time::Instant::now() < deadline, "peers never met");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_relay_transport_creation() {
        let transport = RelayBuilder::default().create(host_config("alpha", 0));
        assert!(transport.is_ok());
    }

    #[test]
    fn test_create_without_runtime_fails() {
        let result = RelayBuilder::default().create(host_config("alpha", 0));
        assert!(matches!(result, Err(TransportError::NetworkError { .. })));
    }

    #[tokio::test]
    async fn test_relay_transport_with_seed() {
        let config = RelayConfig {
            keypair_seed: Some([42u8; 32]),
            ..RelayConfig::default()
        };
        let a = RelayTransport::spawn(host_config("alpha", 0), config.clone()).unwrap();
        let b = RelayTransport::spawn(host_config("beta", 0), config).unwrap();
        assert_eq!(a.local_peer_id(), b.local_peer_id());
    }

    #[tokio::test]
    async fn test_membership_is_self_only() {
        let transport = RelayBuilder::default()
            .create(host_config("alpha", 0))
            .unwrap();
        let peers = transport.peer_descriptions();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].is_self);
        assert_eq!(peers[0].nickname, "alpha");
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_peer() {
        let transport = RelayBuilder::default()
            .create(host_config("alpha", 0))
            .unwrap();
        let (hook, _, _) = recorder();
        let sender = transport.register_channel("defaultchannel", hook);
        let dst = PeerName::new(7);
        let result = sender.gossip_unicast(dst, b"hello");
        assert_eq!(result, Err(TransportError::UnknownPeer { name: dst }));
    }

    #[tokio::test]
    async fn test_oversized_unicast_rejected_before_queueing() {
        let transport = RelayBuilder::default()
            .create(host_config("alpha", 0))
            .unwrap();
        let (hook, _, _) = recorder();
        let sender = transport.register_channel("defaultchannel", hook);
        let payload = vec![0u8; MAX_MESSAGE_SIZE - 8];
        let result = sender.gossip_unicast(PeerName::new(7), &payload);
        match result {
            Err(TransportError::NetworkError { reason }) => {
                assert!(reason.contains("too large"), "{}", reason)
            }
            other => panic!("expected a size error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_targets_reported() {
        let transport = RelayBuilder::default()
            .create(host_config("alpha", 0))
            .unwrap();
        let errors = transport.initiate_connections(
            &["/not/a/multiaddr".to_string(), "127.0.0.1:1".to_string()],
            false,
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TransportError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_connect_accumulates_targets() {
        let mut driver = idle_driver("alpha");
        driver.handle_command(Command::Connect {
            targets: vec![tcp_target(47_401)],
            replace: false,
        });
        driver.handle_command(Command::Connect {
            targets: vec![tcp_target(47_402), tcp_target(47_401)],
            replace: false,
        });
        assert_eq!(
            sorted_targets(&driver),
            vec![tcp_target(47_401), tcp_target(47_402)]
        );
    }

    #[tokio::test]
    async fn test_connect_replace_forgets_old_targets() {
        let mut driver = idle_driver("alpha");
        driver.handle_command(Command::Connect {
            targets: vec![tcp_target(47_401), tcp_target(47_402)],
            replace: false,
        });
        driver.handle_command(Command::Connect {
            targets: vec![tcp_target(47_403)],
            replace: true,
        });
        assert_eq!(sorted_targets(&driver), vec![tcp_target(47_403)]);
        assert_eq!(driver.pending_targets(), vec![tcp_target(47_403)]);
    }

    #[tokio::test]
    async fn test_unconnected_targets_are_redialed() {
        let mut driver = idle_driver("alpha");
        driver.handle_command(Command::Connect {
            targets: vec![tcp_target(47_401), tcp_target(47_402)],
            replace: false,
        });
        // A target that once reached a peer is redialed after that peer
        // disconnects.
        if let Some(slot) = driver.targets.get_mut(&tcp_target(47_402)) {
            *slot = Some(PeerId::random());
        }
        let mut pending = driver.pending_targets();
        pending.sort_by_key(|a| a.to_string());
        assert_eq!(pending, vec![tcp_target(47_401), tcp_target(47_402)]);

        driver.redial();
        assert_eq!(driver.targets.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ignore = "opens local TCP sockets"]
    async fn test_two_nodes_exchange_unicast() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("easymesh_relay=debug")
            .try_init();

        let port = 47_311;
        let a = RelayBuilder::default()
            .create(host_config("alpha", port))
            .unwrap();
        let b = RelayBuilder::default()
            .create(host_config("beta", 0))
            .unwrap();
        let (hook_a, rx_a, _) = recorder();
        let (hook_b, _, _) = recorder();
        let _sender_a = a.register_channel("defaultchannel", hook_a);
        let sender_b = b.register_channel("defaultchannel", hook_b);
        a.start_listening();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let errors = b.initiate_connections(&[format!("127.0.0.1:{}", port)], false);
        assert!(errors.is_empty());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while b.peer_descriptions().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "peers never met");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let alpha = PeerName::from_string_hash("alpha");
        sender_b.gossip_unicast(alpha, b"ping").unwrap();
        let (src, payload) = tokio::task::spawn_blocking(move || {
            rx_a.recv_timeout(Duration::from_secs(10)).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(src, PeerName::from_string_hash("beta"));
        assert_eq!(payload, b"ping");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ignore = "opens local TCP sockets"]
    async fn test_broadcast_delivered_over_gossipsub() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("easymesh_relay=debug")
            .try_init();

        let port = 47_312;
        let a = RelayBuilder::default()
            .create(host_config("alpha", port))
            .unwrap();
        let b = RelayBuilder::default()
            .create(host_config("beta", 0))
            .unwrap();
        let (hook_a, _, broadcasts_a) = recorder();
        let (hook_b, _, _) = recorder();
        let _sender_a = a.register_channel("defaultchannel", hook_a);
        let sender_b = b.register_channel("defaultchannel", hook_b);
        a.start_listening();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(b
            .initiate_connections(&[format!("127.0.0.1:{}", port)], false)
            .is_empty());
        wait_for_members(&b, 2).await;

        // Subscriptions travel after the connection is up, so keep
        // publishing until one gets through.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        let (src, payload) = loop {
            sender_b.gossip_broadcast(&GossipMessage::from(&b"status?"[..]));
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Ok(received) = broadcasts_a.try_recv() {
                break received;
            }
            assert!(tokio::time::Instant::now() < deadline, "broadcast never arrived");
        };
        assert_eq!(src, PeerName::from_string_hash("beta"));
        assert_eq!(payload, b"status?");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ignore = "opens local TCP sockets"]
    async fn test_mismatched_keys_never_identify() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("easymesh_relay=debug")
            .try_init();

        let port = 47_313;
        let a = RelayBuilder::default()
            .create(host_config("alpha", port))
            .unwrap();
        let intruder = RelayBuilder::default()
            .create(HostConfig {
                password: b"puppies".to_vec(),
                ..host_config("mallory", 0)
            })
            .unwrap();
        let friend = RelayBuilder::default()
            .create(host_config("gamma", 0))
            .unwrap();
        a.start_listening();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let target = [format!("127.0.0.1:{}", port)];
        assert!(intruder.initiate_connections(&target, false).is_empty());
        assert!(friend.initiate_connections(&target, false).is_empty());

        // The friend with the right key gets in; the intruder never does.
        wait_for_members(&friend, 2).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(intruder.peer_descriptions().len(), 1);
        let members: Vec<String> = a
            .peer_descriptions()
            .into_iter()
            .map(|d| d.nickname)
            .collect();
        assert_eq!(members.len(), 2);
        assert!(!members.contains(&"mallory".to_string()));
    }
}
