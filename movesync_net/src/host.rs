//! Hosting side of the socket transport.
//!
//! Layout:
//! - one accept task: handshake (`Hello` -> `Welcome`), assigns peer ids
//! - one reader + one writer task per peer (TCP, reliable)
//! - one UDP task (datagrams from every peer)
//! - one hub task that owns the peer table, fans messages out and reports
//!   [`TransportEvent`]s to the session
//!
//! Clients never talk to each other directly. Everything a client broadcasts
//! is relayed by the hub with the original sender id attached.
//!
//! Networking model:
//! - TCP: handshake, membership, spawn/despawn
//! - UDP: state snapshots

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use movesync_shared::{
    event::TransportEvent,
    net::{
        decode_from_bytes, encode_to_bytes, Message, Packet, PeerId, ReliableConn, Target,
        MAX_DATAGRAM_LEN, PROTOCOL_VERSION,
    },
};
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::{mpsc, watch},
};
use tracing::{debug, info, trace, warn};

/// How long a fresh connection gets to send its `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work items for the hub task.
#[derive(Debug)]
enum HubCmd {
    Joined {
        peer: PeerId,
        writer: mpsc::UnboundedSender<Packet>,
        udp_addr: SocketAddr,
    },
    Left {
        peer: PeerId,
    },
    Relay {
        from: PeerId,
        target: Target,
        message: Message,
    },
    Datagram {
        addr: SocketAddr,
        from: PeerId,
        message: Message,
    },
    Broadcast {
        message: Message,
        reliable: bool,
    },
    SendTo {
        peer: PeerId,
        message: Message,
    },
}

/// Handle to a running host. Dropping it shuts every task down.
pub struct HostLink {
    hub_tx: mpsc::UnboundedSender<HubCmd>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl HostLink {
    /// Binds TCP and UDP on `port` (0 = ephemeral, UDP follows TCP's port) and
    /// starts the background tasks. Must be called inside a tokio runtime.
    ///
    /// Binding is synchronous so failures surface to the caller immediately.
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        let std_tcp = std::net::TcpListener::bind(addr).context("tcp bind")?;
        std_tcp.set_nonblocking(true).context("tcp set_nonblocking")?;
        let local_addr = std_tcp.local_addr().context("tcp local_addr")?;

        let std_udp = std::net::UdpSocket::bind(SocketAddr::new(addr.ip(), local_addr.port()))
            .context("udp bind")?;
        std_udp.set_nonblocking(true).context("udp set_nonblocking")?;

        let tcp = TcpListener::from_std(std_tcp).context("register tcp listener")?;
        let udp = Arc::new(UdpSocket::from_std(std_udp).context("register udp socket")?);

        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let hub = Hub {
            peers: BTreeMap::new(),
            udp: Arc::clone(&udp),
            events: events_tx,
        };
        tokio::spawn(hub.run(hub_rx, shutdown_rx.clone()));
        tokio::spawn(accept_loop(tcp, hub_tx.clone(), shutdown_rx.clone()));
        tokio::spawn(udp_loop(udp, hub_tx.clone(), shutdown_rx));

        info!(%local_addr, "Host listening");
        Ok(Self {
            hub_tx,
            events_rx,
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Takes every event reported since the last call.
    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events_rx.try_recv() {
            out.push(ev);
        }
        out
    }

    pub fn broadcast(&self, message: &Message, reliable: bool) {
        let _ = self.hub_tx.send(HubCmd::Broadcast {
            message: message.clone(),
            reliable,
        });
    }

    pub fn send_to(&self, peer: PeerId, message: &Message) {
        let _ = self.hub_tx.send(HubCmd::SendTo {
            peer,
            message: message.clone(),
        });
    }
}

impl Drop for HostLink {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Connected peer as seen by the hub.
struct PeerLink {
    writer: mpsc::UnboundedSender<Packet>,
    udp_addr: SocketAddr,
}

struct Hub {
    peers: BTreeMap<PeerId, PeerLink>,
    udp: Arc<UdpSocket>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Hub {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<HubCmd>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        for link in self.peers.values() {
            let _ = link.writer.send(Packet::Disconnect {
                reason: "host closed".to_string(),
            });
        }
        debug!(peers = self.peers.len(), "Hub stopped");
    }

    fn report(&self, ev: TransportEvent) {
        let _ = self.events.send(ev);
    }

    async fn handle(&mut self, cmd: HubCmd) {
        match cmd {
            HubCmd::Joined {
                peer,
                writer,
                udp_addr,
            } => {
                let _ = writer.send(Packet::PeerJoined {
                    peer_id: PeerId::AUTHORITY,
                });
                for (id, link) in &self.peers {
                    let _ = writer.send(Packet::PeerJoined { peer_id: *id });
                    let _ = link.writer.send(Packet::PeerJoined { peer_id: peer });
                }
                self.peers.insert(peer, PeerLink { writer, udp_addr });
                info!(peer = %peer, %udp_addr, "Peer joined");
                self.report(TransportEvent::PeerConnected(peer));
            }
            HubCmd::Left { peer } => {
                if self.peers.remove(&peer).is_none() {
                    return;
                }
                for link in self.peers.values() {
                    let _ = link.writer.send(Packet::PeerLeft { peer_id: peer });
                }
                info!(peer = %peer, "Peer left");
                self.report(TransportEvent::PeerDisconnected(peer));
            }
            HubCmd::Relay {
                from,
                target,
                message,
            } => match target {
                Target::All => {
                    for (id, link) in &self.peers {
                        if *id != from {
                            let _ = link.writer.send(Packet::Rpc {
                                from,
                                message: message.clone(),
                            });
                        }
                    }
                    self.report(TransportEvent::Message { from, message });
                }
                Target::Peer(to) if to.is_authority() => {
                    self.report(TransportEvent::Message { from, message });
                }
                Target::Peer(to) => match self.peers.get(&to) {
                    Some(link) => {
                        let _ = link.writer.send(Packet::Rpc { from, message });
                    }
                    None => trace!(from = %from, to = %to, "Relay to unknown peer dropped"),
                },
            },
            HubCmd::Datagram {
                addr,
                from,
                message,
            } => {
                if !self.admit_datagram(from, addr) {
                    return;
                }
                self.send_datagram(Some(from), from, &message).await;
                self.report(TransportEvent::Message { from, message });
            }
            HubCmd::Broadcast { message, reliable } => {
                if reliable {
                    for link in self.peers.values() {
                        let _ = link.writer.send(Packet::Rpc {
                            from: PeerId::AUTHORITY,
                            message: message.clone(),
                        });
                    }
                } else {
                    self.send_datagram(None, PeerId::AUTHORITY, &message).await;
                }
            }
            HubCmd::SendTo { peer, message } => {
                if let Some(link) = self.peers.get(&peer) {
                    let _ = link.writer.send(Packet::Rpc {
                        from: PeerId::AUTHORITY,
                        message,
                    });
                }
            }
        }
    }

    /// Checks that a datagram claiming to come from `from` really does, and
    /// learns the peer's actual source port (NAT may rewrite the announced
    /// one). An address already bound to another peer is never taken over.
    fn admit_datagram(&mut self, from: PeerId, addr: SocketAddr) -> bool {
        let owner = self
            .peers
            .iter()
            .find(|(_, link)| link.udp_addr == addr)
            .map(|(id, _)| *id);
        if owner.is_some_and(|owner| owner != from) {
            debug!(from = %from, %addr, "Datagram from another peer's address");
            return false;
        }

        let Some(link) = self.peers.get_mut(&from) else {
            trace!(from = %from, %addr, "Datagram from unknown peer");
            return false;
        };
        if link.udp_addr.ip() != addr.ip() {
            debug!(from = %from, %addr, "Datagram source does not match peer");
            return false;
        }
        link.udp_addr = addr;
        true
    }

    /// Sends a datagram from `from` to every peer except `skip`.
    async fn send_datagram(&self, skip: Option<PeerId>, from: PeerId, message: &Message) {
        let payload = match encode_to_bytes(&Packet::Datagram {
            from,
            message: message.clone(),
        }) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to encode datagram");
                return;
            }
        };
        for (id, link) in &self.peers {
            if Some(*id) == skip {
                continue;
            }
            if let Err(e) = self.udp.send_to(&payload, link.udp_addr).await {
                trace!(peer = %id, error = %e, "udp send failed");
            }
        }
    }
}

async fn accept_loop(
    tcp: TcpListener,
    hub_tx: mpsc::UnboundedSender<HubCmd>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut next_id = PeerId::FIRST_REMOTE;
    loop {
        tokio::select! {
            accepted = tcp.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = next_id;
                    next_id = next_id.next();
                    tokio::spawn(serve_peer(
                        ReliableConn::new(stream),
                        addr,
                        peer,
                        hub_tx.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "tcp accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn handshake(conn: &mut ReliableConn, peer: PeerId) -> anyhow::Result<u16> {
    let hello = conn
        .recv_timeout(HANDSHAKE_TIMEOUT)
        .await?
        .context("handshake timed out")?;
    match hello {
        Packet::Hello { protocol, udp_port } if protocol == PROTOCOL_VERSION => {
            conn.send(&Packet::Welcome { peer_id: peer }).await?;
            Ok(udp_port)
        }
        Packet::Hello { protocol, .. } => {
            let reason = format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}");
            conn.send(&Packet::Disconnect {
                reason: reason.clone(),
            })
            .await?;
            anyhow::bail!(reason)
        }
        other => anyhow::bail!("expected Hello, got {other:?}"),
    }
}

async fn serve_peer(
    mut conn: ReliableConn,
    addr: SocketAddr,
    peer: PeerId,
    hub_tx: mpsc::UnboundedSender<HubCmd>,
    mut shutdown: watch::Receiver<bool>,
) {
    let udp_port = match handshake(&mut conn, peer).await {
        Ok(port) => port,
        Err(e) => {
            warn!(%addr, error = %e, "Handshake failed");
            return;
        }
    };

    let (mut reader, mut writer) = conn.into_split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Packet>();
    tokio::spawn(async move {
        while let Some(packet) = writer_rx.recv().await {
            if let Err(e) = writer.send(&packet).await {
                debug!(peer = %peer, error = %e, "tcp write failed");
                break;
            }
        }
    });

    let joined = HubCmd::Joined {
        peer,
        writer: writer_tx,
        udp_addr: SocketAddr::new(addr.ip(), udp_port),
    };
    if hub_tx.send(joined).is_err() {
        return;
    }

    loop {
        tokio::select! {
            packet = reader.recv() => match packet {
                Ok(Packet::Relay { target, message }) => {
                    let relay = HubCmd::Relay { from: peer, target, message };
                    if hub_tx.send(relay).is_err() {
                        break;
                    }
                }
                Ok(Packet::Disconnect { reason }) => {
                    debug!(peer = %peer, %reason, "Peer disconnecting");
                    break;
                }
                Ok(other) => debug!(peer = %peer, ?other, "Unexpected reliable packet"),
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Connection closed");
                    break;
                }
            },
            _ = shutdown.changed() => return,
        }
    }

    let _ = hub_tx.send(HubCmd::Left { peer });
}

async fn udp_loop(
    udp: Arc<UdpSocket>,
    hub_tx: mpsc::UnboundedSender<HubCmd>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        tokio::select! {
            received = udp.recv_from(&mut buf) => match received {
                Ok((n, addr)) => match decode_from_bytes(&buf[..n]) {
                    Ok(Packet::Datagram { from, message }) => {
                        if hub_tx.send(HubCmd::Datagram { addr, from, message }).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!(%addr, ?other, "Unexpected datagram"),
                    Err(e) => debug!(%addr, error = %e, "Malformed datagram"),
                },
                // ICMP unreachable from a departed peer surfaces here; keep going.
                Err(e) => trace!(error = %e, "udp recv failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}
