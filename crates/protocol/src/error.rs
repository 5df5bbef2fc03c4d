//! Protocol error types.

use thiserror::Error;

/// Errors that can occur during protocol parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Non-finite float in message")]
    NonFinite,

    #[error("{0} trailing bytes after message")]
    TrailingData(usize),

    #[error("Empty message")]
    Empty,
}
