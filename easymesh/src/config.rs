use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use easymesh_types::{HandlerResult, PeerName};
use serde::{Deserialize, Serialize};

use crate::error::PeerError;
use crate::peer::Peer;

/// Message handler. Receives the local peer, the sender's name and the
/// message. May be called from several transport threads at once.
pub type Handler = Arc<dyn Fn(&Peer, PeerName, &[u8]) -> HandlerResult + Send + Sync>;

/// Everything needed to join the mesh. Consumed by [`Peer::new`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listen address. Empty means no listener is started.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// Shared key; every peer in the mesh must use the same one.
    #[serde(default, with = "serde_key")]
    pub key: Vec<u8>,
    /// Let the transport find and connect to peers on its own.
    #[serde(default)]
    pub auto_connect: bool,
    /// Maximum peer connections. Zero or negative means unlimited.
    #[serde(default)]
    pub conn_limit: i64,
    /// Human-friendly name. Required.
    #[serde(default)]
    pub nickname: String,
    /// Explicit identity. Derived from the nickname when unset.
    #[serde(default)]
    pub name: Option<PeerName>,
    /// Peers to connect to at startup.
    #[serde(default)]
    pub initial_peers: Vec<SocketAddr>,
    /// Called for each unicast message.
    #[serde(skip)]
    pub on_message: Option<Handler>,
    /// Called for each broadcast message.
    #[serde(skip)]
    pub on_broadcast: Option<Handler>,
}

impl Config {
    /// A config with the given nickname and everything else defaulted.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file. Handlers are never loaded.
    pub fn load(path: &str) -> Result<Self, PeerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| PeerError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| PeerError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        Ok(config)
    }

    pub fn with_on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Peer, PeerName, &[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn with_on_broadcast<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Peer, PeerName, &[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_broadcast = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("auto_connect", &self.auto_connect)
            .field("conn_limit", &self.conn_limit)
            .field("nickname", &self.nickname)
            .field("name", &self.name)
            .field("initial_peers", &self.initial_peers)
            .field("on_message", &self.on_message.is_some())
            .field("on_broadcast", &self.on_broadcast.is_some())
            .finish()
    }
}

/// Serde helper storing the shared key as a string.
mod serde_key {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = std::str::from_utf8(value)
            .map_err(|_| serde::ser::Error::custom("key is not valid UTF-8"))?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}
