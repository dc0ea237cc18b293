//! Joining side of the socket transport.
//!
//! The client maintains:
//! - A reliable control stream to the host (handshake, membership, spawn/despawn)
//! - An unreliable datagram socket (state snapshots)
//!
//! Connecting happens on a background task so the tick loop never waits on
//! the network. The outcome is reported as `ConnectedToAuthority` or
//! `ConnectionFailed`, exactly once.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use movesync_shared::{
    error::SessionError,
    event::TransportEvent,
    net::{
        Message, Packet, PeerId, ReliableConn, ReliableReader, Target, UnreliableConn,
        PROTOCOL_VERSION,
    },
};
use tokio::{
    net::{lookup_host, TcpStream},
    sync::{mpsc, watch},
    time,
};
use tracing::{debug, info, trace, warn};

/// Outgoing traffic queued by the session.
#[derive(Debug)]
enum Outbound {
    Reliable { target: Target, message: Message },
    Unreliable { message: Message },
}

/// Handle to a client connection (pending or established). Dropping it
/// disconnects.
pub struct ClientLink {
    out_tx: mpsc::UnboundedSender<Outbound>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: watch::Sender<bool>,
    local_id: Option<PeerId>,
}

impl ClientLink {
    /// Starts connecting to `address:port`. Must be called inside a tokio
    /// runtime. Only argument problems are reported here.
    pub fn start(address: &str, port: u16, timeout: Duration) -> Result<Self, SessionError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SessionError::transport("empty address"));
        }
        if port == 0 {
            return Err(SessionError::transport("port 0 is not connectable"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(address, port, "Connecting to host");
        tokio::spawn(run(
            address.to_string(),
            port,
            timeout,
            out_rx,
            events_tx,
            shutdown_rx,
        ));

        Ok(Self {
            out_tx,
            events_rx,
            shutdown,
            local_id: None,
        })
    }

    /// Id assigned by the host; `None` until the handshake event was drained.
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events_rx.try_recv() {
            if let TransportEvent::ConnectedToAuthority { local_id } = ev {
                self.local_id = Some(local_id);
            }
            out.push(ev);
        }
        out
    }

    pub fn send_reliable(&self, target: Target, message: &Message) {
        let _ = self.out_tx.send(Outbound::Reliable {
            target,
            message: message.clone(),
        });
    }

    pub fn send_unreliable(&self, message: &Message) {
        let _ = self.out_tx.send(Outbound::Unreliable {
            message: message.clone(),
        });
    }
}

impl Drop for ClientLink {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct Established {
    reliable: ReliableConn,
    unreliable: UnreliableConn,
    local_id: PeerId,
}

async fn handshake(address: &str, port: u16) -> anyhow::Result<Established> {
    let server_addr = lookup_host((address, port))
        .await
        .with_context(|| format!("resolve {address}"))?
        .next()
        .with_context(|| format!("{address} resolved to nothing"))?;

    // Bind UDP first so we can tell the host where to send snapshots.
    let bind_ip: IpAddr = if server_addr.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let unreliable = UnreliableConn::connect(SocketAddr::new(bind_ip, 0), server_addr).await?;
    let udp_port = unreliable.local_addr()?.port();

    let stream = TcpStream::connect(server_addr)
        .await
        .with_context(|| format!("tcp connect {server_addr}"))?;
    stream.set_nodelay(true).context("set_nodelay")?;
    let mut reliable = ReliableConn::new(stream);

    reliable
        .send(&Packet::Hello {
            protocol: PROTOCOL_VERSION,
            udp_port,
        })
        .await?;

    match reliable.recv().await? {
        Packet::Welcome { peer_id } => Ok(Established {
            reliable,
            unreliable,
            local_id: peer_id,
        }),
        Packet::Disconnect { reason } => anyhow::bail!("rejected by host: {reason}"),
        other => anyhow::bail!("expected Welcome, got {other:?}"),
    }
}

async fn run(
    address: String,
    port: u16,
    timeout: Duration,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let established = tokio::select! {
        res = time::timeout(timeout, handshake(&address, port)) => match res {
            Ok(Ok(est)) => est,
            Ok(Err(e)) => {
                warn!(address = %address, port, error = %e, "Connection failed");
                let _ = events.send(TransportEvent::ConnectionFailed { reason: format!("{e:#}") });
                return;
            }
            Err(_) => {
                warn!(address = %address, port, "Connection timed out");
                let _ = events.send(TransportEvent::ConnectionFailed {
                    reason: format!("timed out after {}ms", timeout.as_millis()),
                });
                return;
            }
        },
        _ = shutdown.changed() => return,
    };

    let Established {
        reliable,
        unreliable,
        local_id,
    } = established;
    info!(peer = %local_id, "Connected to host");
    let _ = events.send(TransportEvent::ConnectedToAuthority { local_id });

    let unreliable = Arc::new(unreliable);
    let (reader, mut writer) = reliable.into_split();
    tokio::spawn(read_reliable(reader, events.clone(), shutdown.clone()));
    tokio::spawn(read_unreliable(Arc::clone(&unreliable), events, shutdown.clone()));

    loop {
        tokio::select! {
            out = out_rx.recv() => match out {
                Some(Outbound::Reliable { target, message }) => {
                    if let Err(e) = writer.send(&Packet::Relay { target, message }).await {
                        debug!(error = %e, "tcp write failed");
                        break;
                    }
                }
                Some(Outbound::Unreliable { message }) => {
                    let packet = Packet::Datagram { from: local_id, message };
                    if let Err(e) = unreliable.send(&packet).await {
                        trace!(error = %e, "udp send failed");
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => {
                let _ = writer
                    .send(&Packet::Disconnect { reason: "leaving".to_string() })
                    .await;
                break;
            }
        }
    }
}

async fn read_reliable(
    mut reader: ReliableReader,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let packet = tokio::select! {
            packet = reader.recv() => packet,
            _ = shutdown.changed() => return,
        };
        let ev = match packet {
            Ok(Packet::PeerJoined { peer_id }) => TransportEvent::PeerConnected(peer_id),
            Ok(Packet::PeerLeft { peer_id }) => TransportEvent::PeerDisconnected(peer_id),
            Ok(Packet::Rpc { from, message }) => TransportEvent::Message { from, message },
            Ok(Packet::Disconnect { reason }) => {
                info!(%reason, "Host closed the session");
                break;
            }
            Ok(other) => {
                debug!(?other, "Unexpected reliable packet");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Connection to host lost");
                break;
            }
        };
        if events.send(ev).is_err() {
            return;
        }
    }

    if !*shutdown.borrow() {
        let _ = events.send(TransportEvent::AuthorityDisconnected);
    }
}

async fn read_unreliable(
    socket: Arc<UnreliableConn>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let packet = tokio::select! {
            packet = socket.recv() => packet,
            _ = shutdown.changed() => return,
        };
        match packet {
            Ok(Packet::Datagram { from, message }) => {
                if events.send(TransportEvent::Message { from, message }).is_err() {
                    return;
                }
            }
            Ok(other) => debug!(?other, "Unexpected datagram"),
            // Includes ICMP port-unreachable once the host is gone.
            Err(e) => trace!(error = %e, "udp recv failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_bad_arguments_synchronously() {
        let timeout = Duration::from_millis(100);
        assert!(matches!(
            ClientLink::start("  ", 8910, timeout),
            Err(SessionError::Transport { .. })
        ));
        assert!(matches!(
            ClientLink::start("127.0.0.1", 0, timeout),
            Err(SessionError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn unresolvable_host_reports_connection_failed() {
        let mut link =
            ClientLink::start("host.invalid", 8910, Duration::from_secs(2)).expect("start");
        let ev = time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(ev) = link.drain_events().into_iter().next() {
                    return ev;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event in time");
        assert!(matches!(ev, TransportEvent::ConnectionFailed { .. }));
        assert_eq!(link.local_id(), None);
    }
}
