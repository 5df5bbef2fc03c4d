//! Local-entity prediction.
//!
//! Inputs are applied to the local copy as soon as they are sampled and
//! kept until the server acknowledges them, so reconciliation can replay
//! whatever the server has not seen yet.

use glam::Vec2;
use protocol::movement::step_toward;
use protocol::packets::{Actions, InputCommand};
use protocol::{MovementParams, WorldBounds};
use std::collections::BTreeMap;
use tracing::trace;

/// Client-side copy of the entity this client controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalEntity {
    pub id: u32,
    pub position: Vec2,
    pub size: f32,
    pub score: u64,
    pub alive: bool,
}

/// Sent but unacknowledged inputs, keyed by sequence.
#[derive(Debug, Clone)]
pub struct PendingInputs {
    inputs: BTreeMap<u32, InputCommand>,
    cap: usize,
}

impl PendingInputs {
    pub fn new(cap: usize) -> Self {
        Self {
            inputs: BTreeMap::new(),
            cap: cap.max(1),
        }
    }

    /// Buffer a command, evicting the lowest sequences past the cap.
    pub fn push(&mut self, cmd: InputCommand) {
        self.inputs.insert(cmd.sequence, cmd);
        while self.inputs.len() > self.cap {
            if let Some((seq, _)) = self.inputs.pop_first() {
                trace!("Pending input {} evicted", seq);
            }
        }
    }

    /// Drop everything the server has applied (sequence ≤ `last_processed`).
    pub fn acknowledge(&mut self, last_processed: u32) {
        self.inputs = self.inputs.split_off(&last_processed.saturating_add(1));
        if last_processed == u32::MAX {
            self.inputs.clear();
        }
    }

    /// Remaining inputs in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &InputCommand> {
        self.inputs.values()
    }

    pub fn sequences(&self) -> Vec<u32> {
        self.inputs.keys().copied().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

/// Replay `inputs` from `position` with the shared movement formula.
pub fn predict_from<'a, I>(
    position: Vec2,
    size: f32,
    inputs: I,
    movement: &MovementParams,
    bounds: &WorldBounds,
) -> Vec2
where
    I: IntoIterator<Item = &'a InputCommand>,
{
    inputs.into_iter().fold(position, |pos, cmd| {
        step_toward(pos, size, cmd.target, movement, bounds)
    })
}

/// Produces sequenced inputs and applies them optimistically.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    next_sequence: u32,
    pub pending: PendingInputs,
    pub movement: MovementParams,
    pub bounds: WorldBounds,
}

impl PredictionEngine {
    pub fn new(movement: MovementParams, bounds: WorldBounds, pending_cap: usize) -> Self {
        Self {
            next_sequence: 1,
            pending: PendingInputs::new(pending_cap),
            movement,
            bounds,
        }
    }

    /// Sequence the next command will carry.
    #[inline]
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Sample one input: move `local` toward `target` and buffer the command.
    ///
    /// Dead entities still produce (and buffer) commands so sequences stay
    /// contiguous, but they do not move.
    pub fn predict(
        &mut self,
        local: &mut LocalEntity,
        target: Vec2,
        actions: Actions,
        timestamp: u64,
    ) -> InputCommand {
        let cmd = InputCommand {
            sequence: self.next_sequence,
            timestamp,
            target,
            actions,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if local.alive {
            local.position = step_toward(local.position, local.size, target, &self.movement, &self.bounds);
        }
        self.pending.push(cmd);
        cmd
    }

    /// Where the pending inputs take `position`.
    pub fn replay(&self, position: Vec2, size: f32) -> Vec2 {
        predict_from(position, size, self.pending.iter(), &self.movement, &self.bounds)
    }
}
