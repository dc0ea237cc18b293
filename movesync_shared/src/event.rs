//! Event and messaging system.
//!
//! - [`TransportEvent`]: what a transport reports to the session, drained once
//!   per tick.
//! - [`EventBus`]: a small typed queue the session fills with notices
//!   ([`EntitySpawned`], [`EntityDespawned`], [`SessionError`]) for the
//!   embedding application to drain.
//!
//! [`SessionError`]: crate::error::SessionError

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::{
    math::Vec2,
    net::{Message, PeerId},
};

/// Notification produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer completed its handshake. Fires on every participant.
    PeerConnected(PeerId),
    /// A peer went away. Fires on every remaining participant.
    PeerDisconnected(PeerId),
    /// Our join succeeded and the authority assigned us `local_id`.
    ConnectedToAuthority { local_id: PeerId },
    /// Our join was rejected or timed out.
    ConnectionFailed { reason: String },
    /// The authority vanished.
    AuthorityDisconnected,
    /// Inbound replication message.
    Message { from: PeerId, message: Message },
}

/// An entity was created locally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySpawned {
    pub peer: PeerId,
    pub position: Vec2,
    pub authoritative: bool,
}

/// An entity was removed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDespawned {
    pub peer: PeerId,
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_separated_by_type() {
        let mut bus = EventBus::default();
        bus.push(EntityDespawned { peer: PeerId(2) });
        bus.push(EntitySpawned {
            peer: PeerId(3),
            position: Vec2::ZERO,
            authoritative: false,
        });
        bus.push(EntityDespawned { peer: PeerId(4) });

        let despawned = bus.drain::<EntityDespawned>();
        assert_eq!(
            despawned,
            vec![
                EntityDespawned { peer: PeerId(2) },
                EntityDespawned { peer: PeerId(4) }
            ]
        );
        assert!(bus.drain::<EntityDespawned>().is_empty());
        assert_eq!(bus.drain::<EntitySpawned>().len(), 1);
    }
}
