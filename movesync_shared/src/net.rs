//! Networking primitives.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the replication messages exchanged between peers.
//! - Keep serialization explicit and versionable.
//!
//! Two layers live here. [`Message`] is what the session layer sends and
//! receives (spawn, despawn, state snapshots). [`Packet`] is the socket framing
//! that carries messages plus the handshake and peer-membership notices.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, UdpSocket,
    },
    time,
};

use crate::math::Vec2;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest reliable frame accepted from the wire.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest datagram we expect to receive.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Identifies one participant in a session.
///
/// Ids are assigned by the transport and are unique per connection. The host
/// always uses [`PeerId::AUTHORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Reserved id of the hosting peer.
    pub const AUTHORITY: PeerId = PeerId(1);

    /// First id handed out to a joining peer.
    pub const FIRST_REMOTE: PeerId = PeerId(2);

    pub fn is_authority(self) -> bool {
        self == Self::AUTHORITY
    }

    pub fn next(self) -> PeerId {
        PeerId(self.0.wrapping_add(1).max(Self::FIRST_REMOTE.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replication message routed between sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// Authority -> all: create the entity owned by `peer`.
    Spawn { peer: PeerId, position: Vec2 },
    /// Authority -> all: remove the entity owned by `peer`.
    Despawn { peer: PeerId },
    /// Owner -> all: latest physics state of the owner's entity.
    StateSnapshot {
        peer: PeerId,
        seq: u64,
        position: Vec2,
        velocity: Vec2,
    },
}

/// Discriminant of [`Message`], used for routing and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Spawn,
    Despawn,
    StateSnapshot,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Spawn { .. } => MessageKind::Spawn,
            Message::Despawn { .. } => MessageKind::Despawn,
            Message::StateSnapshot { .. } => MessageKind::StateSnapshot,
        }
    }

    /// Peer whose entity this message is about.
    pub fn subject(&self) -> PeerId {
        match self {
            Message::Spawn { peer, .. }
            | Message::Despawn { peer }
            | Message::StateSnapshot { peer, .. } => *peer,
        }
    }
}

/// Delivery target of a relayed reliable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    All,
    Peer(PeerId),
}

/// Socket-level framing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Packet {
    // ─── Connection handshake ───
    /// Client -> host: first frame, also announces the client's UDP port.
    Hello { protocol: u32, udp_port: u16 },
    /// Host -> client: the id assigned to this connection.
    Welcome { peer_id: PeerId },

    // ─── Membership ───
    PeerJoined { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },

    // ─── Messages ───
    /// Client -> host: reliable message to fan out.
    Relay { target: Target, message: Message },
    /// Host -> client: reliable message originated by `from`.
    Rpc { from: PeerId, message: Message },
    /// Either direction over UDP.
    Datagram { from: PeerId, message: Message },

    // ─── Disconnect ───
    Disconnect { reason: String },
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, packet: &Packet) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(packet).context("serialize packet")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Packet> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let packet = serde_json::from_slice(&payload).context("deserialize packet")?;
    Ok(packet)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, packet: &Packet) -> anyhow::Result<()> {
        write_frame(&mut self.stream, packet).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Packet> {
        read_frame(&mut self.stream).await
    }

    /// Receives a frame within the given timeout.
    pub async fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<Packet>> {
        match time::timeout(timeout, read_frame(&mut self.stream)).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { half: read }, ReliableWriter { half: write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    half: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<Packet> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    half: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, packet: &Packet) -> anyhow::Result<()> {
        write_frame(&mut self.half, packet).await
    }
}

/// Unreliable channel over UDP, connected to a single peer.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket })
    }

    pub async fn send(&self, packet: &Packet) -> anyhow::Result<()> {
        let payload = encode_to_bytes(packet)?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<Packet> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        decode_from_bytes(&buf[..n])
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(packet: &Packet) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(packet).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<Packet> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip_bytes() {
        let packet = Packet::Datagram {
            from: PeerId(3),
            message: Message::StateSnapshot {
                peer: PeerId(3),
                seq: 7,
                position: Vec2::new(1.5, -2.0),
                velocity: Vec2::new(0.0, 220.0),
            },
        };
        let bytes = encode_to_bytes(&packet).unwrap();
        assert_eq!(decode_from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn message_kind_and_subject() {
        let msg = Message::Despawn { peer: PeerId(4) };
        assert_eq!(msg.kind(), MessageKind::Despawn);
        assert_eq!(msg.subject(), PeerId(4));
    }

    #[test]
    fn peer_ids_skip_reserved_values() {
        assert!(PeerId::AUTHORITY.is_authority());
        assert_eq!(PeerId(2).next(), PeerId(3));
        assert_eq!(PeerId(u32::MAX).next(), PeerId::FIRST_REMOTE);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut reader = wire.as_slice();
        assert!(read_frame(&mut reader).await.is_err());
    }
}
