//! Server error types.

use thiserror::Error;

/// Errors surfaced by game state operations.
///
/// None of these are fatal to the loop: the caller logs them and moves on.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Client {0} not found")]
    UnknownClient(u32),

    #[error("Entity {0} not found")]
    EntityNotFound(u32),

    #[error("Client {0} has not joined")]
    NotJoined(u32),

    #[error("Client {0} already joined")]
    AlreadyJoined(u32),

    #[error("Join rejected for '{0}'")]
    JoinRejected(String),

    #[error("Respawn rejected: {0}")]
    RespawnRejected(&'static str),

    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
}
