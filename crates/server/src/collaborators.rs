//! Outside services the game loop reports to.
//!
//! The loop only ever pushes into these; it never waits on or reads back
//! from them. Implementations must return quickly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Per-entity outcome of a finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct GameResult {
    pub entity_id: u32,
    pub name: String,
    pub is_bot: bool,
    pub won: bool,
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
    pub survival_time_ms: u64,
    pub max_size: f32,
    pub earnings: f64,
}

/// Receives round results once per round.
pub trait StatsSink: Send + Sync {
    fn record_game(&self, results: Vec<GameResult>);
}

/// Logs a one-line summary per round.
#[derive(Debug, Default)]
pub struct LogStats;

impl StatsSink for LogStats {
    fn record_game(&self, results: Vec<GameResult>) {
        match results.iter().find(|r| r.won) {
            Some(winner) => info!(
                "Round over: {} entities, winner {} ({}) with score {}",
                results.len(),
                winner.entity_id,
                winner.name,
                winner.score
            ),
            None => info!("Round over: {} entities, no winner", results.len()),
        }
    }
}

/// A discrete, timestamped thing that happened in the arena.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    Join {
        entity_id: u32,
        name: String,
        is_bot: bool,
        at_ms: u64,
    },
    Leave {
        entity_id: u32,
        at_ms: u64,
    },
    Kill {
        killer_id: u32,
        victim_id: u32,
        at_ms: u64,
    },
    PelletEaten {
        entity_id: u32,
        pellet_id: u32,
        at_ms: u64,
    },
}

/// Stream of audit events. `record` must never block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::PelletEaten { .. } => {
                tracing::trace!(target: "audit", ?event);
            }
            _ => debug!(target: "audit", ?event),
        }
    }
}

/// Forwards events to an unbounded channel for an out-of-loop consumer.
#[derive(Debug, Clone)]
pub struct ChannelAudit {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAudit {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAudit {
    fn record(&self, event: AuditEvent) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Decides whether a join may proceed.
pub trait JoinGate: Send + Sync {
    fn authorize(&self, name: &str) -> bool;
}

/// Lets everyone in.
#[derive(Debug, Default)]
pub struct OpenGate;

impl JoinGate for OpenGate {
    fn authorize(&self, _name: &str) -> bool {
        true
    }
}

/// The set of collaborators handed to the game state.
#[derive(Clone)]
pub struct Collaborators {
    pub stats: Arc<dyn StatsSink>,
    pub audit: Arc<dyn AuditSink>,
    pub gate: Arc<dyn JoinGate>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            stats: Arc::new(LogStats),
            audit: Arc::new(TracingAudit),
            gate: Arc::new(OpenGate),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_audit_forwards_and_ignores_closed() {
        let (audit, mut rx) = ChannelAudit::new();
        audit.record(AuditEvent::Leave {
            entity_id: 3,
            at_ms: 10,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            AuditEvent::Leave {
                entity_id: 3,
                at_ms: 10
            }
        );
        drop(rx);
        audit.record(AuditEvent::Leave {
            entity_id: 4,
            at_ms: 11,
        });
    }

    #[test]
    fn test_open_gate() {
        assert!(OpenGate.authorize("anyone"));
    }
}
