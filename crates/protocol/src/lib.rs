//! Shared protocol crate for the arena server and client.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - Message definitions and the opcode dispatch for both directions
//! - The movement formula both sides must agree on
//! - Shared types (Color, WorldBounds, etc.)

mod binary;
mod error;
pub mod movement;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;
pub use movement::MovementParams;

use glam::Vec2;

/// RGB color used for pellets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Represents a 2D position using glam's Vec2.
pub type Position = Vec2;

/// Axis-aligned world border, centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl WorldBounds {
    pub fn new(width: f32, height: f32) -> Self {
        let half = Vec2::new(width / 2.0, height / 2.0);
        Self {
            min: -half,
            max: half,
        }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Clamp a cell centre so the cell stays inside the border.
    ///
    /// Cells wider than the world are pinned to the centre line instead of
    /// producing an inverted range.
    #[inline]
    pub fn clamp(&self, position: Vec2, size: f32) -> Vec2 {
        let half = size / 2.0;
        let lo = self.min + Vec2::splat(half);
        let hi = self.max - Vec2::splat(half);
        let centre = (self.min + self.max) / 2.0;
        Vec2::new(
            if lo.x <= hi.x { position.x.max(lo.x).min(hi.x) } else { centre.x },
            if lo.y <= hi.y { position.y.max(lo.y).min(hi.y) } else { centre.y },
        )
    }

    #[inline]
    pub fn contains(&self, position: Vec2) -> bool {
        position.x >= self.min.x
            && position.x <= self.max.x
            && position.y >= self.min.y
            && position.y <= self.max.y
    }
}

/// Mass derived from size: size² / 100.
#[inline]
pub fn size_to_mass(size: f32) -> f32 {
    size * size / 100.0
}

/// Size derived from mass: sqrt(100 × mass).
#[inline]
pub fn mass_to_size(mass: f32) -> f32 {
    (100.0 * mass.max(0.0)).sqrt()
}
