//! Input sources for the peer binary.
//!
//! In a real game this would integrate with a window's keyboard events. Here
//! [`KeyState`] holds the pressed directions and [`WanderInput`] drives a
//! headless bot.

use std::f32::consts::TAU;

use movesync_shared::{input::InputSource, math::Vec2};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Which direction keys are currently held. Screen coordinates: y grows down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl KeyState {
    /// Combined direction, normalized so diagonals are not faster.
    pub fn vector(self) -> Vec2 {
        let axis = |neg: bool, pos: bool| f32::from(u8::from(pos)) - f32::from(u8::from(neg));
        Vec2::new(axis(self.left, self.right), axis(self.up, self.down)).clamp_length(1.0)
    }

    /// Presses `left`, `right`, `up` or `down`, releasing the opposite key.
    /// Returns `false` for any other name.
    pub fn hold(&mut self, key: &str) -> bool {
        match key {
            "left" => (self.left, self.right) = (true, false),
            "right" => (self.left, self.right) = (false, true),
            "up" => (self.up, self.down) = (true, false),
            "down" => (self.up, self.down) = (false, true),
            _ => return false,
        }
        true
    }

    pub fn release_all(&mut self) {
        *self = Self::default();
    }
}

impl InputSource for KeyState {
    fn direction(&mut self) -> Vec2 {
        self.vector()
    }
}

/// Random walk: holds a heading for `interval` ticks, then picks another.
/// Sometimes stands still instead.
#[derive(Debug, Clone)]
pub struct WanderInput {
    rng: StdRng,
    interval: u32,
    remaining: u32,
    heading: Vec2,
}

/// Chance of idling instead of picking a new heading.
const IDLE_CHANCE: f64 = 0.2;

impl WanderInput {
    pub fn new(seed: u64, interval: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interval: interval.max(1),
            remaining: 0,
            heading: Vec2::ZERO,
        }
    }

    fn pick_heading(&mut self) -> Vec2 {
        if self.rng.gen_bool(IDLE_CHANCE) {
            return Vec2::ZERO;
        }
        let angle = self.rng.gen_range(0.0..TAU);
        Vec2::new(angle.cos(), angle.sin())
    }
}

impl InputSource for WanderInput {
    fn direction(&mut self) -> Vec2 {
        if self.remaining == 0 {
            self.heading = self.pick_heading();
            self.remaining = self.interval;
        }
        self.remaining -= 1;
        self.heading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_keys_cancel() {
        let keys = KeyState {
            left: true,
            right: true,
            ..Default::default()
        };
        assert_eq!(keys.vector(), Vec2::ZERO);
        assert_eq!(KeyState::default().vector(), Vec2::ZERO);
    }

    #[test]
    fn up_is_negative_y() {
        let keys = KeyState {
            up: true,
            ..Default::default()
        };
        assert_eq!(keys.vector(), Vec2::new(0.0, -1.0));
    }

    #[test]
    fn diagonal_is_normalized() {
        let keys = KeyState {
            right: true,
            down: true,
            ..Default::default()
        };
        let v = keys.vector();
        assert!((v.length() - 1.0).abs() < 1e-5);
        assert!(v.x > 0.0 && v.y > 0.0);
    }

    #[test]
    fn hold_combines_axes_and_replaces_opposites() {
        let mut keys = KeyState::default();
        assert!(keys.hold("left"));
        assert!(keys.hold("down"));
        assert!(keys.hold("right"));
        assert_eq!(
            keys,
            KeyState {
                right: true,
                down: true,
                ..Default::default()
            }
        );
        assert!(!keys.hold("sideways"));

        keys.release_all();
        assert_eq!(keys.direction(), Vec2::ZERO);
    }

    #[test]
    fn wander_holds_heading_for_interval_and_is_seeded() {
        let mut a = WanderInput::new(7, 5);
        let mut b = WanderInput::new(7, 5);
        let first = a.direction();
        for _ in 0..4 {
            assert_eq!(a.direction(), first);
        }
        for _ in 0..5 {
            b.direction();
        }
        assert_eq!(a.direction(), b.direction());
        assert!(a.direction().length() <= 1.0 + 1e-5);
    }
}
