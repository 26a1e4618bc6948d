//! Agent protocol
//!
//! This module defines the messages exchanged between the leader and worker
//! agents in agents mode. Messages are serialized with MessagePack (rmp-serde).
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Leader                          Worker Agent
//!     |                              |
//!     |<------ REGISTER(rank) -------|
//!     |------- REGISTER_ACK -------->|
//!     |                              |
//!     |------- LOOKUP(rank) -------->|
//!     |<------ PLACEMENT ------------|   (or LOOKUP_FAILED)
//!     |                              |
//!     |------- SHUTDOWN ------------>|
//! ```
//!
//! Either side may send ERROR instead of the expected reply.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::error::LookupError;
use crate::pmi::{NodeId, Rank};
use crate::topology::Coordinate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Leader and agents must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame; real messages are a few dozen bytes
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Registration request (Agent → Leader)
    Register(RegisterMessage),

    /// Registration accepted (Leader → Agent)
    RegisterAck(RegisterAckMessage),

    /// Placement request (Leader → Agent)
    Lookup(LookupMessage),

    /// Placement answer (Agent → Leader)
    Placement(PlacementMessage),

    /// Placement could not be resolved (Agent → Leader)
    LookupFailed(LookupFailedMessage),

    /// Collection finished, agent may exit (Leader → Agent)
    Shutdown,

    /// Request rejected
    Error(ErrorMessage),
}

/// Registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMessage {
    pub protocol_version: u32,
    pub rank: Rank,
    /// Group size as seen by the agent's launcher
    pub group_size: usize,
    pub node_id: NodeId,
    /// Host name, for diagnostics only
    pub hostname: String,
}

/// Registration accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAckMessage {
    pub protocol_version: u32,
    pub rank: Rank,
}

/// Placement request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMessage {
    pub rank: Rank,
}

/// Placement answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementMessage {
    pub rank: Rank,
    pub node_id: NodeId,
    pub coordinate: Coordinate,
}

/// Placement failure reported by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupFailedMessage {
    pub rank: Rank,
    pub node_id: NodeId,
    pub failure: RemoteFailure,
}

/// Agent-side failure kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFailure {
    TopologyUnavailable,
    Other(String),
}

impl LookupFailedMessage {
    pub fn from_error(rank: Rank, node_id: NodeId, err: &LookupError) -> Self {
        let failure = match err {
            LookupError::TopologyUnavailable(_) => RemoteFailure::TopologyUnavailable,
            other => RemoteFailure::Other(other.to_string()),
        };
        Self {
            rank,
            node_id,
            failure,
        }
    }

    /// Leader-side view of the failure
    pub fn into_error(self) -> LookupError {
        match self.failure {
            RemoteFailure::TopologyUnavailable => LookupError::TopologyUnavailable(self.node_id),
            RemoteFailure::Other(reason) => LookupError::Transport(reason),
        }
    }
}

/// Error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Rank the error concerns, if known
    pub rank: Option<Rank>,
    pub error: String,
}

/// Serialize a message with its 4-byte length prefix
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    let msg_len = u32::try_from(msg_bytes.len())
        .context("Message too large to frame")?;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a framed message from a buffer
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len])
        .context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read the next message, or `None` if the peer closed the stream between frames
pub async fn try_read_message<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_MESSAGE_LEN);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Read the next message, treating a closed stream as an error
pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin + ?Sized,
{
    try_read_message(stream)
        .await?
        .context("Connection closed by peer")
}

/// Write a framed message and flush it
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_register() {
        let msg = Message::Register(RegisterMessage {
            protocol_version: PROTOCOL_VERSION,
            rank: 7,
            group_size: 16,
            node_id: NodeId(1042),
            hostname: "nid01042".to_string(),
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn test_lookup_failed_maps_back_to_error() {
        let msg = LookupFailedMessage::from_error(
            2,
            NodeId(12),
            &LookupError::TopologyUnavailable(NodeId(12)),
        );
        assert_eq!(msg.failure, RemoteFailure::TopologyUnavailable);
        assert_eq!(msg.into_error(), LookupError::TopologyUnavailable(NodeId(12)));

        let msg = LookupFailedMessage::from_error(2, NodeId(12), &LookupError::Transport("boom".into()));
        assert!(matches!(msg.into_error(), LookupError::Transport(ref s) if s.contains("boom")));
    }

    #[test]
    fn test_message_framing() {
        let bytes = serialize_message(&Message::Shutdown).unwrap();

        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_incomplete_buffer() {
        let bytes = serialize_message(&Message::Lookup(LookupMessage { rank: 3 })).unwrap();
        assert!(deserialize_message(&bytes[..2]).is_err());
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_message(&mut a, &Message::Lookup(LookupMessage { rank: 5 })).await.unwrap();
        write_message(&mut a, &Message::Shutdown).await.unwrap();
        drop(a);

        assert_eq!(
            read_message(&mut b).await.unwrap(),
            Message::Lookup(LookupMessage { rank: 5 })
        );
        assert_eq!(try_read_message(&mut b).await.unwrap(), Some(Message::Shutdown));
        assert_eq!(try_read_message(&mut b).await.unwrap(), None);
        assert!(read_message(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_MESSAGE_LEN as u32 + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();

        assert!(read_message(&mut b).await.is_err());
    }
}
