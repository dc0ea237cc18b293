//! In-memory transport.
//!
//! Several [`LoopbackTransport`] endpoints share one [`LoopbackNetwork`] and
//! exchange events through per-endpoint inboxes, with the same observable
//! behavior as the socket transport:
//! - Joining assigns ids from 2 upward.
//! - The joiner sees `ConnectedToAuthority` followed by `PeerConnected` for
//!   the host and every existing peer. Everyone else sees `PeerConnected` for
//!   the joiner.
//! - Sends from a client reach the other clients as if relayed by the host,
//!   with `from` set to the original sender.
//! - Each inbox is strictly FIFO. Unreliable sends can be dropped on demand.
//!
//! Single-threaded: endpoints share state through `Rc<RefCell<_>>`.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
    rc::Rc,
};

use tracing::debug;

use crate::{
    error::SessionError,
    event::TransportEvent,
    net::{Message, PeerId},
    transport::Transport,
};

type EndpointKey = usize;

#[derive(Debug, Default)]
enum Link {
    #[default]
    Idle,
    Host {
        port: u16,
        next_peer: PeerId,
        peers: BTreeMap<PeerId, EndpointKey>,
    },
    Client {
        host: EndpointKey,
        id: PeerId,
    },
}

#[derive(Debug, Default)]
struct Slot {
    inbox: VecDeque<TransportEvent>,
    link: Link,
}

#[derive(Debug, Default)]
struct Hub {
    slots: Vec<Slot>,
    listeners: HashMap<u16, EndpointKey>,
    drop_unreliable: bool,
}

impl Hub {
    fn push(&mut self, key: EndpointKey, ev: TransportEvent) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.inbox.push_back(ev);
        }
    }

    fn peers_of(&self, host: EndpointKey) -> Vec<(PeerId, EndpointKey)> {
        match self.slots.get(host).map(|s| &s.link) {
            Some(Link::Host { peers, .. }) => peers.iter().map(|(id, k)| (*id, *k)).collect(),
            _ => Vec::new(),
        }
    }

    /// Every endpoint other than `sender` in the sender's session, and the id
    /// the sender is known by.
    fn audience(&self, sender: EndpointKey) -> Option<(PeerId, Vec<EndpointKey>)> {
        match &self.slots.get(sender)?.link {
            Link::Idle => None,
            Link::Host { peers, .. } => Some((PeerId::AUTHORITY, peers.values().copied().collect())),
            Link::Client { host, id } => {
                let mut keys = vec![*host];
                keys.extend(
                    self.peers_of(*host)
                        .into_iter()
                        .filter(|(peer, _)| peer != id)
                        .map(|(_, k)| k),
                );
                Some((*id, keys))
            }
        }
    }

    fn broadcast(&mut self, sender: EndpointKey, message: &Message) {
        let Some((from, keys)) = self.audience(sender) else {
            return;
        };
        for key in keys {
            self.push(
                key,
                TransportEvent::Message {
                    from,
                    message: message.clone(),
                },
            );
        }
    }
}

/// Shared in-memory network.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, idle endpoint on this network.
    pub fn endpoint(&self) -> LoopbackTransport {
        let mut hub = self.hub.borrow_mut();
        hub.slots.push(Slot::default());
        LoopbackTransport {
            hub: Rc::clone(&self.hub),
            key: hub.slots.len() - 1,
        }
    }

    /// When set, unreliable sends are silently lost.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.hub.borrow_mut().drop_unreliable = drop;
    }
}

/// One participant's view of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    hub: Rc<RefCell<Hub>>,
    key: EndpointKey,
}

impl LoopbackTransport {
    fn is_idle(hub: &Hub, key: EndpointKey) -> bool {
        matches!(hub.slots.get(key).map(|s| &s.link), Some(Link::Idle) | None)
    }
}

impl Transport for LoopbackTransport {
    fn listen(&mut self, port: u16) -> Result<(), SessionError> {
        let mut hub = self.hub.borrow_mut();
        if !Self::is_idle(&hub, self.key) {
            return Err(SessionError::transport("endpoint already in use"));
        }
        if hub.listeners.contains_key(&port) {
            return Err(SessionError::transport(format!("port {port} already in use")));
        }
        hub.listeners.insert(port, self.key);
        hub.slots[self.key].link = Link::Host {
            port,
            next_peer: PeerId::FIRST_REMOTE,
            peers: BTreeMap::new(),
        };
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<(), SessionError> {
        if address.trim().is_empty() {
            return Err(SessionError::transport("empty address"));
        }
        let mut hub = self.hub.borrow_mut();
        if !Self::is_idle(&hub, self.key) {
            return Err(SessionError::transport("endpoint already in use"));
        }

        let Some(&host) = hub.listeners.get(&port) else {
            hub.push(
                self.key,
                TransportEvent::ConnectionFailed {
                    reason: format!("no listener on {address}:{port}"),
                },
            );
            return Ok(());
        };

        let id = match &mut hub.slots[host].link {
            Link::Host {
                next_peer, peers, ..
            } => {
                let id = *next_peer;
                *next_peer = id.next();
                peers.insert(id, self.key);
                id
            }
            _ => return Err(SessionError::transport("listener is not hosting")),
        };
        hub.slots[self.key].link = Link::Client { host, id };
        debug!(peer = %id, port, "Loopback peer joined");

        let others: Vec<(PeerId, EndpointKey)> = hub
            .peers_of(host)
            .into_iter()
            .filter(|(peer, _)| *peer != id)
            .collect();

        hub.push(self.key, TransportEvent::ConnectedToAuthority { local_id: id });
        hub.push(self.key, TransportEvent::PeerConnected(PeerId::AUTHORITY));
        for (peer, key) in &others {
            hub.push(self.key, TransportEvent::PeerConnected(*peer));
            hub.push(*key, TransportEvent::PeerConnected(id));
        }
        hub.push(host, TransportEvent::PeerConnected(id));
        Ok(())
    }

    fn close(&mut self) {
        let mut hub = self.hub.borrow_mut();
        let link = std::mem::take(&mut hub.slots[self.key].link);
        hub.slots[self.key].inbox.clear();

        match link {
            Link::Idle => {}
            Link::Host { port, peers, .. } => {
                hub.listeners.remove(&port);
                for key in peers.into_values() {
                    hub.slots[key].link = Link::Idle;
                    hub.push(key, TransportEvent::AuthorityDisconnected);
                }
            }
            Link::Client { host, id } => {
                if let Link::Host { peers, .. } = &mut hub.slots[host].link {
                    peers.remove(&id);
                }
                for (_, key) in hub.peers_of(host) {
                    hub.push(key, TransportEvent::PeerDisconnected(id));
                }
                hub.push(host, TransportEvent::PeerDisconnected(id));
            }
        }
    }

    fn local_id(&self) -> Option<PeerId> {
        match self.hub.borrow().slots.get(self.key).map(|s| &s.link) {
            Some(Link::Host { .. }) => Some(PeerId::AUTHORITY),
            Some(Link::Client { id, .. }) => Some(*id),
            _ => None,
        }
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.hub.borrow_mut().slots[self.key].inbox.drain(..).collect()
    }

    fn send_reliable_to_all(&mut self, message: &Message) {
        self.hub.borrow_mut().broadcast(self.key, message);
    }

    fn send_reliable_to(&mut self, peer: PeerId, message: &Message) {
        let mut hub = self.hub.borrow_mut();
        let (from, target) = match &hub.slots[self.key].link {
            Link::Idle => return,
            Link::Host { peers, .. } => (PeerId::AUTHORITY, peers.get(&peer).copied()),
            Link::Client { host, id } => {
                let target = if peer.is_authority() {
                    Some(*host)
                } else {
                    hub.peers_of(*host)
                        .into_iter()
                        .find(|(p, _)| *p == peer)
                        .map(|(_, k)| k)
                };
                (*id, target)
            }
        };
        if let Some(key) = target {
            hub.push(
                key,
                TransportEvent::Message {
                    from,
                    message: message.clone(),
                },
            );
        }
    }

    fn send_unreliable_to_all(&mut self, message: &Message) {
        let mut hub = self.hub.borrow_mut();
        if hub.drop_unreliable {
            return;
        }
        hub.broadcast(self.key, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn port_can_only_be_bound_once() {
        let net = LoopbackNetwork::new();
        let mut a = net.endpoint();
        let mut b = net.endpoint();
        a.listen(8910).unwrap();
        assert!(matches!(b.listen(8910), Err(SessionError::Transport { .. })));
        assert!(b.listen(8911).is_ok());
    }

    #[test]
    fn connect_without_listener_fails_asynchronously() {
        let net = LoopbackNetwork::new();
        let mut b = net.endpoint();
        assert!(b.connect("127.0.0.1", 8910).is_ok());
        let events = b.poll_events();
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::ConnectionFailed { .. }]
        ));
    }

    #[test]
    fn join_announces_membership_to_everyone() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let mut b = net.endpoint();
        let mut c = net.endpoint();
        host.listen(1).unwrap();
        b.connect("local", 1).unwrap();
        c.connect("local", 1).unwrap();

        assert_eq!(b.local_id(), Some(PeerId(2)));
        assert_eq!(c.local_id(), Some(PeerId(3)));
        assert_eq!(
            host.poll_events(),
            vec![
                TransportEvent::PeerConnected(PeerId(2)),
                TransportEvent::PeerConnected(PeerId(3))
            ]
        );
        assert_eq!(
            c.poll_events(),
            vec![
                TransportEvent::ConnectedToAuthority { local_id: PeerId(3) },
                TransportEvent::PeerConnected(PeerId(1)),
                TransportEvent::PeerConnected(PeerId(2)),
            ]
        );
        assert_eq!(
            b.poll_events().last(),
            Some(&TransportEvent::PeerConnected(PeerId(3)))
        );
    }

    #[test]
    fn client_broadcast_reaches_host_and_other_clients() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let mut b = net.endpoint();
        let mut c = net.endpoint();
        host.listen(1).unwrap();
        b.connect("local", 1).unwrap();
        c.connect("local", 1).unwrap();
        for t in [&mut host, &mut b, &mut c] {
            t.poll_events();
        }

        let msg = Message::StateSnapshot {
            peer: PeerId(2),
            seq: 0,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
        };
        b.send_unreliable_to_all(&msg);
        let expected = vec![TransportEvent::Message {
            from: PeerId(2),
            message: msg,
        }];
        assert_eq!(host.poll_events(), expected);
        assert_eq!(c.poll_events(), expected);
        assert!(b.poll_events().is_empty());
    }

    #[test]
    fn host_close_orphans_clients() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let mut b = net.endpoint();
        host.listen(1).unwrap();
        b.connect("local", 1).unwrap();
        b.poll_events();

        host.close();
        assert_eq!(b.poll_events(), vec![TransportEvent::AuthorityDisconnected]);
        assert_eq!(b.local_id(), None);
        assert!(b.listen(1).is_ok());
    }
}
