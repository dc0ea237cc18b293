//! Input collaborator.
//!
//! Only the locally authoritative entity reads input, once per tick.

use crate::math::Vec2;

/// Source of the local player's movement direction.
pub trait InputSource {
    /// Direction for this tick, each axis in `[-1, 1]`.
    fn direction(&mut self) -> Vec2;
}

/// Always idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputSource for NoInput {
    fn direction(&mut self) -> Vec2 {
        Vec2::ZERO
    }
}

/// Replays a fixed list of directions, one per tick, looping.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    steps: Vec<Vec2>,
    cursor: usize,
}

impl ScriptedInput {
    pub fn new(steps: Vec<Vec2>) -> Self {
        Self { steps, cursor: 0 }
    }

    /// Holds one direction forever.
    pub fn constant(direction: Vec2) -> Self {
        Self::new(vec![direction])
    }
}

impl InputSource for ScriptedInput {
    fn direction(&mut self) -> Vec2 {
        if self.steps.is_empty() {
            return Vec2::ZERO;
        }
        let dir = self.steps[self.cursor % self.steps.len()];
        self.cursor = self.cursor.wrapping_add(1);
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_input_loops() {
        let mut input = ScriptedInput::new(vec![Vec2::new(1.0, 0.0), Vec2::new(0.0, -1.0)]);
        assert_eq!(input.direction(), Vec2::new(1.0, 0.0));
        assert_eq!(input.direction(), Vec2::new(0.0, -1.0));
        assert_eq!(input.direction(), Vec2::new(1.0, 0.0));
        assert_eq!(ScriptedInput::new(Vec::new()).direction(), Vec2::ZERO);
    }
}
