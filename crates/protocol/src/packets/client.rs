//! Client -> Server messages.

use super::ClientOpcode;
use crate::{BinaryReader, BinaryWriter, ProtocolError};
use glam::Vec2;

const ACTION_SPLIT: u8 = 0x01;
const ACTION_EJECT: u8 = 0x02;

/// One-shot actions carried inside an input sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions {
    pub split: bool,
    pub eject: bool,
}

impl Actions {
    pub const NONE: Actions = Actions {
        split: false,
        eject: false,
    };

    pub fn bits(&self) -> u8 {
        let mut b = 0;
        if self.split {
            b |= ACTION_SPLIT;
        }
        if self.eject {
            b |= ACTION_EJECT;
        }
        b
    }

    /// Unknown bits are ignored so newer clients can add actions.
    pub fn from_bits(b: u8) -> Self {
        Self {
            split: b & ACTION_SPLIT != 0,
            eject: b & ACTION_EJECT != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.split && !self.eject
    }
}

/// One input sample from a client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    /// Strictly increasing per client.
    pub sequence: u32,
    /// Client clock, milliseconds.
    pub timestamp: u64,
    /// World-space pointer position.
    pub target: Vec2,
    pub actions: Actions,
}

/// Parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join the arena (0x00).
    Join { name: String },
    /// Input sample (0x10).
    Input(InputCommand),
    /// Respawn request (0x20).
    RespawnRequest,
}

impl ClientMessage {
    /// Parse a client message from raw bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = BinaryReader::new(data.to_vec());
        if reader.remaining() == 0 {
            return Err(ProtocolError::Empty);
        }
        let msg = match ClientOpcode::try_from(reader.read_u8()?)? {
            ClientOpcode::Join => ClientMessage::Join {
                name: reader.read_string()?,
            },
            ClientOpcode::Input => {
                let sequence = reader.read_u32()?;
                let timestamp = reader.read_u64()?;
                let target = reader.read_vec2()?;
                let actions = Actions::from_bits(reader.read_u8()?);
                ClientMessage::Input(InputCommand {
                    sequence,
                    timestamp,
                    target,
                    actions,
                })
            }
            ClientOpcode::RespawnRequest => ClientMessage::RespawnRequest,
        };
        reader.finish()?;
        Ok(msg)
    }

    /// Serialize this message.
    pub fn encode(&self) -> BinaryWriter {
        match self {
            ClientMessage::Join { name } => {
                let mut w = BinaryWriter::with_capacity(3 + name.len());
                w.put_u8(ClientOpcode::Join as u8);
                w.put_string(name);
                w
            }
            ClientMessage::Input(cmd) => {
                let mut w = BinaryWriter::with_capacity(22);
                w.put_u8(ClientOpcode::Input as u8);
                w.put_u32(cmd.sequence);
                w.put_u64(cmd.timestamp);
                w.put_vec2(cmd.target);
                w.put_u8(cmd.actions.bits());
                w
            }
            ClientMessage::RespawnRequest => {
                let mut w = BinaryWriter::with_capacity(1);
                w.put_u8(ClientOpcode::RespawnRequest as u8);
                w
            }
        }
    }
}
