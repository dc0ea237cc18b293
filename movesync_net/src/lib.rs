//! `movesync_net`
//!
//! Socket transport for movesync sessions: TCP carries the handshake,
//! membership and spawn/despawn, UDP carries state snapshots. The host relays
//! everything between clients.

pub mod client;
pub mod host;
pub mod input;
pub mod transport;

pub use transport::SocketTransport;
