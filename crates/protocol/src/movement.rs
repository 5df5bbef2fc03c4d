//! Movement rules shared by the server simulation and client prediction.
//!
//! Prediction is only as good as the agreement between both sides, so the
//! formula lives here and nowhere else.

use crate::WorldBounds;
use glam::Vec2;

/// Exponent of the size/speed falloff.
const SPEED_EXPONENT: f32 = 0.439;

/// Tunables for the movement formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementParams {
    /// Distance a cell of `reference_size` travels per input command.
    pub base_speed: f32,
    /// Lower bound of the size multiplier, so huge cells still move.
    pub speed_floor: f32,
    /// Size at which the multiplier is exactly 1.
    pub reference_size: f32,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            base_speed: 6.0,
            speed_floor: 0.25,
            reference_size: 25.0,
        }
    }
}

/// Per-command travel distance for a cell of the given size.
///
/// Monotonically non-increasing in `size`, never below
/// `base_speed * speed_floor`.
#[inline]
pub fn speed_for_size(size: f32, params: &MovementParams) -> f32 {
    let size = size.max(1.0);
    let mult = (params.reference_size / size).powf(SPEED_EXPONENT);
    params.base_speed * mult.max(params.speed_floor)
}

/// Advance `position` one command toward `target`, then clamp to the border.
///
/// The step never overshoots the target, so a cell parked on the cursor
/// stays still instead of jittering around it.
pub fn step_toward(
    position: Vec2,
    size: f32,
    target: Vec2,
    params: &MovementParams,
    bounds: &WorldBounds,
) -> Vec2 {
    let delta = target - position;
    let dist = delta.length();
    if dist < 1e-3 {
        return bounds.clamp(position, size);
    }
    let step = speed_for_size(size, params).min(dist);
    bounds.clamp(position + delta / dist * step, size)
}
