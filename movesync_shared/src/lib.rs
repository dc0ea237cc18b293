//! `movesync_shared`
//!
//! Replication core shared by every participant in a session.
//!
//! Design goals:
//! - Transport-agnostic: sockets, loopback or anything else plugs in through
//!   [`transport::Transport`].
//! - Single-threaded tick model; no handler ever suspends.
//! - Collaborators (transport, input, physics world) are injected, never looked
//!   up globally.
//! - No `unsafe`.

pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod loopback;
pub mod math;
pub mod net;
pub mod physics;
pub mod placement;
pub mod registry;
pub mod replicator;
pub mod session;
pub mod transport;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::net::{Message, MessageKind, PeerId};
    pub use crate::physics::*;
    pub use crate::placement::*;
    pub use crate::replicator::{Entity, Role};
    pub use crate::session::*;
    pub use crate::transport::*;
}
