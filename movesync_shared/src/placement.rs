//! Deterministic per-peer placement and tint.
//!
//! Both functions depend only on the peer id, so every participant computes the
//! same values without transmitting them.

use crate::{
    math::{Color, Vec2},
    net::PeerId,
};

/// Golden-ratio conjugate; successive ids land far apart on the hue wheel.
const HUE_STEP: f64 = 0.618_033_988_75;

const SPAWN_EXTENT: u64 = 400;

/// Initial position for a peer's entity: `((p*50) mod 400, (p*80) mod 400)`.
///
/// Spreads spawns cheaply; overlaps are possible.
pub fn spawn_position(peer: PeerId) -> Vec2 {
    let p = u64::from(peer.0);
    Vec2::new(
        ((p * 50) % SPAWN_EXTENT) as f32,
        ((p * 80) % SPAWN_EXTENT) as f32,
    )
}

/// Display color for a peer's entity.
pub fn color_for_peer(peer: PeerId) -> Color {
    let hue = (f64::from(peer.0) * HUE_STEP).rem_euclid(1.0) as f32;
    Color::from_hsv(hue, 0.85, 1.0)
}
