//! Physics abstraction.
//!
//! The replicator only needs one primitive from the world: move a body along
//! its velocity for `dt` seconds and resolve collisions by sliding.

use crate::math::{Rect, Vec2};

/// Resolved body state after a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Physical world collaborator.
pub trait PhysicsWorld {
    /// Sweeps a body from `position` along `velocity` for `dt` seconds and
    /// returns where it ended up. Blocked velocity components are removed.
    fn move_and_slide(&mut self, position: Vec2, velocity: Vec2, dt: f32) -> Motion;
}

/// World without colliders.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenWorld;

impl PhysicsWorld for OpenWorld {
    fn move_and_slide(&mut self, position: Vec2, velocity: Vec2, dt: f32) -> Motion {
        Motion {
            position: position + velocity * dt,
            velocity,
        }
    }
}

/// Bounded play area with static rectangular obstacles.
///
/// Bodies are axis-aligned boxes of size `2 * body_half`. Movement is resolved
/// one axis at a time (x then y), so a body hitting a wall keeps sliding along
/// it.
#[derive(Debug, Clone)]
pub struct Arena {
    pub bounds: Rect,
    pub obstacles: Vec<Rect>,
    pub body_half: Vec2,
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn along(self, v: Vec2) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
        }
    }

    fn across(self, v: Vec2) -> f32 {
        match self {
            Axis::X => v.y,
            Axis::Y => v.x,
        }
    }

    fn with(self, v: Vec2, value: f32) -> Vec2 {
        match self {
            Axis::X => Vec2::new(value, v.y),
            Axis::Y => Vec2::new(v.x, value),
        }
    }
}

const CONTACT_EPSILON: f32 = 1e-4;

impl Arena {
    pub fn new(bounds: Rect, body_half: Vec2) -> Self {
        Self {
            bounds,
            obstacles: Vec::new(),
            body_half,
        }
    }

    pub fn with_obstacle(mut self, obstacle: Rect) -> Self {
        self.obstacles.push(obstacle);
        self
    }

    /// Moves `position` by `delta` along `axis`. Returns the new position and
    /// whether the move was cut short.
    fn sweep(&self, axis: Axis, position: Vec2, delta: f32) -> (Vec2, bool) {
        if delta == 0.0 {
            return (position, false);
        }

        let start = axis.along(position);
        let half = axis.along(self.body_half);
        let across = axis.across(position);
        let half_across = axis.across(self.body_half);
        let mut target = start + delta;
        let mut blocked = false;

        for o in &self.obstacles {
            // Touching edges on the cross axis do not collide.
            if axis.across(o.max) <= across - half_across
                || axis.across(o.min) >= across + half_across
            {
                continue;
            }

            if delta > 0.0 {
                let face = axis.along(o.min);
                if face >= start + half - CONTACT_EPSILON && face < target + half {
                    target = target.min(face - half);
                    blocked = true;
                }
            } else {
                let face = axis.along(o.max);
                if face <= start - half + CONTACT_EPSILON && face > target - half {
                    target = target.max(face + half);
                    blocked = true;
                }
            }
        }

        let lo = axis.along(self.bounds.min) + half;
        let hi = axis.along(self.bounds.max) - half;
        if lo <= hi {
            if target > hi {
                target = hi;
                blocked = true;
            } else if target < lo {
                target = lo;
                blocked = true;
            }
        }

        (axis.with(position, target), blocked)
    }
}

impl PhysicsWorld for Arena {
    fn move_and_slide(&mut self, position: Vec2, velocity: Vec2, dt: f32) -> Motion {
        let mut velocity = velocity;

        let (position, blocked_x) = self.sweep(Axis::X, position, velocity.x * dt);
        if blocked_x {
            velocity.x = 0.0;
        }
        let (position, blocked_y) = self.sweep(Axis::Y, position, velocity.y * dt);
        if blocked_y {
            velocity.y = 0.0;
        }

        Motion { position, velocity }
    }
}
