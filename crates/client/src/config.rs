//! Client tunables.

use protocol::MovementParams;
use serde::{Deserialize, Serialize};

/// Netcode settings for one client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote entities are drawn this far in the past.
    pub interpolation_delay_ms: u64,
    /// Samples older than this (relative to the newest) are evicted.
    pub interpolation_window_ms: u64,
    pub interpolation_max_samples: usize,
    /// Unacknowledged inputs kept for replay; oldest evicted first.
    pub pending_input_cap: usize,
    /// Prediction error tolerated without correction.
    pub correction_threshold: f32,
    /// Prediction error past which the local entity teleports.
    pub snap_threshold: f32,
    /// Must match the server's `[player]` movement settings.
    pub base_speed: f32,
    pub speed_floor: f32,
    pub reference_size: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let movement = MovementParams::default();
        Self {
            interpolation_delay_ms: 100,
            interpolation_window_ms: 1000,
            interpolation_max_samples: 32,
            pending_input_cap: 128,
            correction_threshold: 5.0,
            snap_threshold: 50.0,
            base_speed: movement.base_speed,
            speed_floor: movement.speed_floor,
            reference_size: movement.reference_size,
        }
    }
}

impl ClientConfig {
    pub fn movement(&self) -> MovementParams {
        MovementParams {
            base_speed: self.base_speed,
            speed_floor: self.speed_floor,
            reference_size: self.reference_size,
        }
    }
}
