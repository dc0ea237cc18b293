//! Transport collaborator.
//!
//! A transport owns the sockets (or the in-memory stand-in) for one
//! participant. It never blocks the tick loop: `listen`/`connect` only start
//! the work, sends are fire-and-forget, and everything that happens later is
//! reported through [`Transport::poll_events`].

use crate::{
    error::SessionError,
    event::TransportEvent,
    net::{Message, PeerId},
};

pub trait Transport {
    /// Starts accepting peers on `port`. Errors are immediate bind failures.
    fn listen(&mut self, port: u16) -> Result<(), SessionError>;

    /// Starts joining `address:port`. Success or failure arrives later as
    /// [`TransportEvent::ConnectedToAuthority`] or
    /// [`TransportEvent::ConnectionFailed`]; errors returned here mean the
    /// attempt could not even start.
    fn connect(&mut self, address: &str, port: u16) -> Result<(), SessionError>;

    /// Drops the current connection or listener. Idempotent.
    fn close(&mut self);

    /// Our id, once known. Always [`PeerId::AUTHORITY`] while listening.
    fn local_id(&self) -> Option<PeerId>;

    /// Takes every event queued since the last call, in arrival order.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Ordered, reliable delivery to every other participant.
    fn send_reliable_to_all(&mut self, message: &Message);

    /// Ordered, reliable delivery to one participant.
    fn send_reliable_to(&mut self, peer: PeerId, message: &Message);

    /// Best-effort delivery to every other participant.
    fn send_unreliable_to_all(&mut self, message: &Message);
}
