//! Server reconciliation for the local entity.

use crate::config::ClientConfig;
use crate::prediction::{LocalEntity, PendingInputs, predict_from};
use protocol::packets::EntityState;
use protocol::{MovementParams, WorldBounds};
use tracing::debug;

/// What reconciliation did to the local position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Prediction was close enough.
    None { error: f32 },
    /// Reset to the server position and replayed the remaining inputs.
    Replayed { error: f32, replayed: usize },
    /// Divergence too large to smooth; teleported.
    Snapped { error: f32 },
}

impl Correction {
    pub fn error(&self) -> f32 {
        match *self {
            Correction::None { error }
            | Correction::Replayed { error, .. }
            | Correction::Snapped { error } => error,
        }
    }
}

/// Fold an authoritative state for the local entity into the prediction.
///
/// Size, score and liveness always come from the server; only position is
/// predicted.
pub fn reconcile(
    local: &mut LocalEntity,
    server: &EntityState,
    pending: &mut PendingInputs,
    movement: &MovementParams,
    bounds: &WorldBounds,
    config: &ClientConfig,
) -> Correction {
    if let Some(last) = server.last_processed_input {
        pending.acknowledge(last);
    }

    local.size = server.size;
    local.score = server.score;
    local.alive = server.is_alive;

    let error = local.position.distance(server.position);
    if error <= config.correction_threshold {
        return Correction::None { error };
    }

    // The server does not move dead entities, so there is nothing to replay.
    if error > config.snap_threshold || !local.alive {
        debug!("Snapping entity {} ({:.1} units off)", local.id, error);
        local.position = server.position;
        return Correction::Snapped { error };
    }

    local.position = predict_from(server.position, local.size, pending.iter(), movement, bounds);
    Correction::Replayed {
        error,
        replayed: pending.len(),
    }
}
