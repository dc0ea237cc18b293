//! [`Transport`] over real sockets.
//!
//! Hosting binds TCP and UDP on the same port; joining connects to both.
//! All socket work runs on tokio tasks, the session only ever sees queued
//! events.

use std::{net::SocketAddr, time::Duration};

use movesync_shared::{
    config::SessionConfig,
    error::SessionError,
    event::TransportEvent,
    net::{Message, PeerId, Target},
    transport::Transport,
};

use crate::{client::ClientLink, host::HostLink};

#[derive(Default)]
enum Link {
    #[default]
    Idle,
    Host(HostLink),
    Client(ClientLink),
}

/// Socket-backed transport. Must be used from inside a tokio runtime.
pub struct SocketTransport {
    link: Link,
    connect_timeout: Duration,
}

impl SocketTransport {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self {
            link: Link::Idle,
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        }
    }

    /// Bound address while hosting. Useful after listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            Link::Host(host) => Some(host.local_addr()),
            _ => None,
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.link {
            Link::Idle => Ok(()),
            _ => Err(SessionError::transport("transport already in use")),
        }
    }
}

impl Transport for SocketTransport {
    fn listen(&mut self, port: u16) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let host = HostLink::bind(port)
            .map_err(|e| SessionError::transport(format!("listen on port {port}: {e:#}")))?;
        self.link = Link::Host(host);
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.link = Link::Client(ClientLink::start(address, port, self.connect_timeout)?);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the link signals its tasks to stop.
        self.link = Link::Idle;
    }

    fn local_id(&self) -> Option<PeerId> {
        match &self.link {
            Link::Idle => None,
            Link::Host(_) => Some(PeerId::AUTHORITY),
            Link::Client(client) => client.local_id(),
        }
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events = match &mut self.link {
            Link::Idle => return Vec::new(),
            Link::Host(host) => host.drain_events(),
            Link::Client(client) => client.drain_events(),
        };

        // A failed or lost client connection leaves nothing worth keeping.
        let terminal = events.iter().any(|ev| {
            matches!(
                ev,
                TransportEvent::ConnectionFailed { .. } | TransportEvent::AuthorityDisconnected
            )
        });
        if terminal && matches!(self.link, Link::Client(_)) {
            self.link = Link::Idle;
        }
        events
    }

    fn send_reliable_to_all(&mut self, message: &Message) {
        match &self.link {
            Link::Idle => {}
            Link::Host(host) => host.broadcast(message, true),
            Link::Client(client) => client.send_reliable(Target::All, message),
        }
    }

    fn send_reliable_to(&mut self, peer: PeerId, message: &Message) {
        match &self.link {
            Link::Idle => {}
            Link::Host(host) => host.send_to(peer, message),
            Link::Client(client) => client.send_reliable(Target::Peer(peer), message),
        }
    }

    fn send_unreliable_to_all(&mut self, message: &Message) {
        match &self.link {
            Link::Idle => {}
            Link::Host(host) => host.broadcast(message, false),
            Link::Client(client) => client.send_unreliable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let mut t = SocketTransport::new(&SessionConfig::default());
        t.listen(0).expect("listen");
        assert_eq!(t.local_id(), Some(PeerId::AUTHORITY));
        assert!(t.local_addr().is_some());
        assert!(matches!(t.listen(0), Err(SessionError::Transport { .. })));
        assert!(matches!(
            t.connect("127.0.0.1", 8910),
            Err(SessionError::Transport { .. })
        ));

        t.close();
        assert_eq!(t.local_id(), None);
        assert!(t.local_addr().is_none());
    }

    #[tokio::test]
    async fn port_in_use_fails_immediately() {
        let mut a = SocketTransport::new(&SessionConfig::default());
        a.listen(0).expect("listen");
        let port = a.local_addr().expect("bound").port();

        let mut b = SocketTransport::new(&SessionConfig::default());
        assert!(matches!(b.listen(port), Err(SessionError::Transport { .. })));
        assert_eq!(b.local_id(), None);
    }
}
