use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

use crate::error::PeerNameError;

/// Number of significant octets in a peer name.
pub const NAME_OCTETS: usize = 6;

/// Identifies a peer in the mesh network.
///
/// It is common to use the peer's network adapter MAC address. The value is
/// stored in a `u64` but only the low six bytes are significant: the
/// textual form drops anything above bit 47. Global uniqueness is assumed,
/// never checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerName(u64);

impl PeerName {
    /// Wrap a raw numeric name.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value, including any bits above the significant 48.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Generate a random name from six bytes of OS entropy.
    pub fn random() -> Result<Self, PeerNameError> {
        let mut bytes = [0u8; NAME_OCTETS];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(std::io::Error::from)?;
        Ok(Self(fold_be(&bytes)))
    }

    /// Derive a name from the first 8 bytes (little-endian) of the SHA-512
    /// digest of `seed`.
    ///
    /// Deterministic but not injective: distinct seeds collide with
    /// birthday-bound probability over the 64-bit output, and only 48 bits
    /// survive the textual form.
    pub fn from_string_hash(seed: impl AsRef<[u8]>) -> Self {
        let digest = Sha512::digest(seed.as_ref());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_le_bytes(head))
    }

    /// Parse a MAC-address-like string of colon-separated hex octets.
    ///
    /// Each group holds one or two hex digits. A single `::` stands for the
    /// contiguous zero groups needed to reach six octets, as in IPv6
    /// addresses, and must replace at least two of them.
    pub fn from_mac_addr(s: &str) -> Result<Self, PeerNameError> {
        let invalid = || PeerNameError::InvalidFormat {
            input: s.to_string(),
        };

        let octets = match s.split_once("::") {
            None => {
                let octets = parse_groups(s).ok_or_else(invalid)?;
                if octets.len() != NAME_OCTETS {
                    return Err(invalid());
                }
                octets
            }
            Some((head, tail)) => {
                if tail.contains("::") {
                    return Err(invalid());
                }
                let head = parse_optional_groups(head).ok_or_else(invalid)?;
                let tail = parse_optional_groups(tail).ok_or_else(invalid)?;
                let explicit = head.len() + tail.len();
                if explicit == 0 || explicit > NAME_OCTETS - 2 {
                    return Err(invalid());
                }
                let mut octets = head;
                octets.resize(NAME_OCTETS - tail.len(), 0);
                octets.extend(tail);
                octets
            }
        };

        Ok(Self(fold_be(&octets)))
    }

    /// Interpret exactly eight bytes as a big-endian integer.
    pub fn from_eui64(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Derive a name from a hardware address of any length.
    ///
    /// - 8 bytes: [`PeerName::from_eui64`].
    /// - fewer than 8 bytes: the colon-hex rendering is parsed with
    ///   [`PeerName::from_mac_addr`], so only 6-byte input succeeds.
    /// - more than 8 bytes: [`PeerName::from_string_hash`] of the colon-hex
    ///   rendering.
    ///
    /// The branches use unrelated algorithms. Call the named constructor
    /// directly when the input length is known.
    pub fn from_hardware_addr(addr: &[u8]) -> Result<Self, PeerNameError> {
        match addr.len() {
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(addr);
                Ok(Self::from_eui64(bytes))
            }
            n if n < 8 => Self::from_mac_addr(&hardware_addr_string(addr)),
            _ => Ok(Self::from_string_hash(hardware_addr_string(addr))),
        }
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for PeerName {
    type Err = PeerNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mac_addr(s)
    }
}

impl From<u64> for PeerName {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<PeerName> for u64 {
    fn from(name: PeerName) -> Self {
        name.0
    }
}

/// Serialized as the canonical colon-hex string.
impl Serialize for PeerName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Render bytes as lowercase colon-separated hex, the way hardware
/// addresses are conventionally printed.
pub fn hardware_addr_string(addr: &[u8]) -> String {
    addr.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn fold_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn parse_optional_groups(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() {
        Some(Vec::new())
    } else {
        parse_groups(s)
    }
}

fn parse_groups(s: &str) -> Option<Vec<u8>> {
    s.split(':').map(parse_octet).collect()
}

fn parse_octet(group: &str) -> Option<u8> {
    if group.is_empty() || group.len() > 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(group, 16).ok()
}
