use std::time::Duration;

/// libp2p tuning for a relay transport.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long an idle connection is kept open.
    pub idle_connection_timeout: Duration,
    /// Gossipsub heartbeat interval.
    pub heartbeat_interval: Duration,
    /// How often disconnected targets are redialed and hook state is gossiped.
    pub redial_interval: Duration,
    /// Optional keypair seed (32 bytes). If None, generates random.
    pub keypair_seed: Option<[u8; 32]>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_connection_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(1),
            redial_interval: Duration::from_secs(30),
            keypair_seed: None,
        }
    }
}
