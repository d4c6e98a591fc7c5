use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use futures::prelude::*;
use libp2p::swarm::StreamProtocol;
use std::io;

use crate::error::RelayError;
use crate::protocol::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum FrameKind {
    /// Addressed to one peer.
    Unicast,
    /// One-shot event for every peer.
    Broadcast,
    /// Periodic state gossip.
    State,
}

/// A channel message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub channel: String,
    /// Raw name of the originating peer.
    pub src: u64,
    pub payload: Vec<u8>,
}

/// Reply to a unicast frame, carrying the remote handler outcome.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Ack {
    pub error: Option<String>,
}

/// Borsh-based length-prefixed codec for direct frames over libp2p
/// request-response.
///
/// Wire format: `[4-byte length][1-byte protocol version][borsh payload]`
///
/// The length prefix covers the version byte + payload (i.e. `1 + payload.len()`).
/// On receive, the version byte is checked; a mismatch produces a clear IO error.
#[derive(Debug, Clone, Default)]
pub struct MeshCodec;

#[async_trait]
impl libp2p::request_response::Codec for MeshCodec {
    type Protocol = StreamProtocol;
    type Request = Frame;
    type Response = Ack;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_length_prefixed(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_length_prefixed(io).await
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, &res).await
    }
}

/// Read a versioned, length-prefixed value from an async reader.
async fn read_length_prefixed<M, T>(io: &mut T) -> io::Result<M>
where
    M: BorshDeserialize,
    T: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message too large: {} bytes (max {})",
                len, MAX_MESSAGE_SIZE
            ),
        ));
    }

    if len < 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message too short: missing protocol version byte",
        ));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    let version = buf[0];
    if version != PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "protocol version mismatch: peer sent v{}, we run v{}",
                version, PROTOCOL_VERSION
            ),
        ));
    }

    M::try_from_slice(&buf[1..]).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a versioned, length-prefixed value to an async writer.
async fn write_length_prefixed<M, T>(io: &mut T, msg: &M) -> io::Result<()>
where
    M: BorshSerialize,
    T: AsyncWrite + Unpin + Send,
{
    let data = encode(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    io.write_all(&data).await?;
    Ok(())
}

// ─── Gossipsub helpers ──────────────────────────────────────────────────────

/// Encode a value into a versioned, length-prefixed byte vector.
///
/// Wire format: `[4-byte BE length][1-byte version][borsh payload]`
pub fn encode<M: BorshSerialize>(msg: &M) -> Result<Vec<u8>, RelayError> {
    let data = borsh::to_vec(msg).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;

    check_body_len(data.len())?;

    // Length = 1 (version byte) + payload length.
    let len = ((1 + data.len()) as u32).to_be_bytes();
    let mut out = Vec::with_capacity(4 + 1 + data.len());
    out.extend_from_slice(&len);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Fail with `MessageTooLarge` if `msg` would not fit in one wire frame,
/// without serializing it.
pub fn ensure_fits<M: BorshSerialize>(msg: &M) -> Result<(), RelayError> {
    let len = borsh::object_length(msg).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })?;
    check_body_len(len)
}

/// The length prefix covers the version byte as well as the borsh body.
fn check_body_len(body: usize) -> Result<(), RelayError> {
    let size = 1 + body;
    if size > MAX_MESSAGE_SIZE {
        return Err(RelayError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Decode a versioned, length-prefixed byte slice.
pub fn decode<M: BorshDeserialize>(data: &[u8]) -> Result<M, RelayError> {
    if data.len() < 4 {
        return Err(RelayError::CodecError {
            reason: "data too short for length prefix".to_string(),
        });
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(RelayError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    if len < 1 {
        return Err(RelayError::CodecError {
            reason: "message too short: missing protocol version byte".to_string(),
        });
    }

    if data.len() < 4 + len {
        return Err(RelayError::CodecError {
            reason: format!(
                "data too short: expected {} bytes, got {}",
                4 + len,
                data.len()
            ),
        });
    }

    let version = data[4];
    if version != PROTOCOL_VERSION {
        return Err(RelayError::VersionMismatch {
            peer: version,
            ours: PROTOCOL_VERSION,
        });
    }

    M::try_from_slice(&data[5..4 + len]).map_err(|e| RelayError::CodecError {
        reason: e.to_string(),
    })
}
