//! Client session state.

use glam::Vec2;
use protocol::packets::InputCommand;
use std::collections::VecDeque;
use std::net::SocketAddr;
use tracing::debug;

/// Why an input was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    /// Target is NaN or infinite.
    NonFinite,
    /// Sequence not newer than the last one accepted.
    Stale { last: u32 },
}

/// A connected client session.
#[derive(Debug)]
pub struct Session {
    /// Unique client ID.
    pub id: u32,
    /// Remote address.
    pub addr: SocketAddr,
    /// Player name, set on join.
    pub name: String,
    /// Entity this client controls, once joined.
    pub entity_id: Option<u32>,
    /// Latest pointer target.
    pub target: Vec2,
    input_queue: VecDeque<InputCommand>,
    input_queue_limit: usize,
    /// Highest sequence accepted into the queue.
    last_received_sequence: Option<u32>,
    /// Highest sequence applied by the loop.
    pub last_processed_input: Option<u32>,
    /// Inputs dropped because the queue overflowed.
    pub dropped_inputs: u64,
    /// Last activity timestamp.
    pub last_activity: std::time::Instant,
}

impl Session {
    pub fn new(id: u32, addr: SocketAddr, input_queue_limit: usize) -> Self {
        Self {
            id,
            addr,
            name: String::new(),
            entity_id: None,
            target: Vec2::ZERO,
            input_queue: VecDeque::with_capacity(input_queue_limit.min(64)),
            input_queue_limit: input_queue_limit.max(1),
            last_received_sequence: None,
            last_processed_input: None,
            dropped_inputs: 0,
            last_activity: std::time::Instant::now(),
        }
    }

    /// Update activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = std::time::Instant::now();
    }

    #[inline]
    pub fn has_joined(&self) -> bool {
        self.entity_id.is_some()
    }

    /// Queue an input for the next tick.
    ///
    /// Drops the oldest queued input when the queue is full.
    pub fn push_input(&mut self, cmd: InputCommand) -> Result<(), InputRejection> {
        if !cmd.target.is_finite() {
            return Err(InputRejection::NonFinite);
        }
        if let Some(last) = self.last_received_sequence
            && cmd.sequence <= last
        {
            return Err(InputRejection::Stale { last });
        }
        self.last_received_sequence = Some(cmd.sequence);

        if self.input_queue.len() >= self.input_queue_limit {
            if let Some(old) = self.input_queue.pop_front() {
                debug!(
                    "Client {} input queue full, dropping sequence {}",
                    self.id, old.sequence
                );
            }
            self.dropped_inputs += 1;
        }
        self.input_queue.push_back(cmd);
        Ok(())
    }

    /// Take every queued input, oldest first.
    pub fn drain_inputs(&mut self) -> Vec<InputCommand> {
        self.input_queue.drain(..).collect()
    }

    #[inline]
    pub fn queued_inputs(&self) -> usize {
        self.input_queue.len()
    }

    /// Record that `cmd` has been applied.
    pub fn mark_processed(&mut self, cmd: &InputCommand) {
        self.target = cmd.target;
        self.last_processed_input = Some(cmd.sequence);
    }
}
