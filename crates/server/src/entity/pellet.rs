//! Food pellet.

use glam::Vec2;
use protocol::Color;
use protocol::packets::PelletState;

/// A pellet that grows whoever eats it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pellet {
    pub id: u32,
    pub position: Vec2,
    pub size: f32,
    /// Cosmetic only.
    pub color: Color,
    /// Drives both size and score gain on consumption.
    pub value: f32,
}

impl Pellet {
    pub fn new(id: u32, position: Vec2, size: f32, color: Color, value: f32) -> Self {
        Self {
            id,
            position,
            size,
            color,
            value,
        }
    }

    pub fn state(&self) -> PelletState {
        PelletState {
            id: self.id,
            position: self.position,
            size: self.size,
            color: self.color,
        }
    }
}
