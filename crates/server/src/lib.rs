//! Authoritative arena game server library.

pub mod ai;
pub mod collaborators;
pub mod collision;
pub mod config;
pub mod entity;
pub mod error;
pub mod pellets;
pub mod server;
pub mod spatial;
pub mod world;

// Re-export commonly used types
pub use collaborators::{
    AuditEvent, AuditSink, ChannelAudit, Collaborators, GameResult, JoinGate, LogStats, OpenGate,
    StatsSink, TracingAudit,
};
pub use config::Config;
pub use error::GameError;
pub use server::{
    GameState, PendingBroadcasts, TargetedMessage, WorldUpdateBroadcast, run, run_game_loop,
    run_with,
};
