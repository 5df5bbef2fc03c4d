//! Message definitions for the arena protocol.
//!
//! This module contains both client->server and server->client message types.
//! Every message starts with a one-byte opcode; decoding dispatches on it.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Opcodes for client -> server messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join the arena with a display name.
    Join = 0x00,
    /// One input sample.
    Input = 0x10,
    /// Ask to respawn after death.
    RespawnRequest = 0x20,
}

impl TryFrom<u8> for ClientOpcode {
    type Error = crate::ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Join),
            0x10 => Ok(Self::Input),
            0x20 => Ok(Self::RespawnRequest),
            other => Err(crate::ProtocolError::InvalidOpcode(other)),
        }
    }
}

/// Opcodes for server -> client messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Join accepted; carries the client's entity id and world border.
    Welcome = 0x01,
    /// World state (full or delta).
    WorldSnapshot = 0x10,
    /// Roster gained an entity.
    PlayerJoined = 0x20,
    /// Roster lost an entity.
    PlayerLeft = 0x21,
    /// Combat notification.
    PlayerDeath = 0x30,
    /// Respawn done.
    RespawnComplete = 0x31,
    /// Respawn refused (retryable).
    RespawnRejected = 0x32,
}

impl TryFrom<u8> for ServerOpcode {
    type Error = crate::ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::Welcome),
            0x10 => Ok(Self::WorldSnapshot),
            0x20 => Ok(Self::PlayerJoined),
            0x21 => Ok(Self::PlayerLeft),
            0x30 => Ok(Self::PlayerDeath),
            0x31 => Ok(Self::RespawnComplete),
            0x32 => Ok(Self::RespawnRejected),
            other => Err(crate::ProtocolError::InvalidOpcode(other)),
        }
    }
}
