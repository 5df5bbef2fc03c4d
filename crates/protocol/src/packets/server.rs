//! Server -> Client messages.

use super::ServerOpcode;
use crate::{BinaryReader, BinaryWriter, Color, ProtocolError, WorldBounds};
use glam::Vec2;

const FLAG_ALIVE: u8 = 0x01;
const FLAG_HAS_LAST_INPUT: u8 = 0x02;

/// Authoritative state of one entity inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub id: u32,
    pub position: Vec2,
    pub size: f32,
    pub score: u64,
    pub is_alive: bool,
    /// Highest input sequence the server has applied for this entity's owner.
    pub last_processed_input: Option<u32>,
}

/// State of one pellet inside a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PelletState {
    pub id: u32,
    pub position: Vec2,
    pub size: f32,
    pub color: Color,
}

/// One world update.
///
/// Full snapshots carry the complete entity roster (clients use them to detect
/// removals) and every pellet. Deltas carry only changed entities and no
/// pellets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    /// Server clock, milliseconds.
    pub timestamp: u64,
    pub is_delta: bool,
    pub entities: Vec<EntityState>,
    pub pellets: Vec<PelletState>,
}

/// Parsed server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Join accepted (0x01).
    Welcome {
        entity_id: u32,
        bounds: WorldBounds,
        tick_rate: u32,
    },
    /// World update (0x10).
    WorldSnapshot(WorldSnapshot),
    /// Roster gained an entity (0x20).
    PlayerJoined { entity_id: u32, is_bot: bool },
    /// Roster lost an entity (0x21).
    PlayerLeft { entity_id: u32, is_bot: bool },
    /// Combat notification (0x30). Cosmetic: the next snapshot is authoritative.
    PlayerDeath {
        killer_id: u32,
        victim_id: u32,
        timestamp: u64,
    },
    /// Respawn done (0x31).
    RespawnComplete {
        position: Vec2,
        size: f32,
        score: u64,
    },
    /// Respawn refused (0x32); the client may retry.
    RespawnRejected { reason: String },
}

impl ServerMessage {
    /// Serialize this message.
    pub fn encode(&self) -> BinaryWriter {
        match self {
            ServerMessage::Welcome {
                entity_id,
                bounds,
                tick_rate,
            } => {
                let mut w = BinaryWriter::with_capacity(25);
                w.put_u8(ServerOpcode::Welcome as u8);
                w.put_u32(*entity_id);
                w.put_vec2(bounds.min);
                w.put_vec2(bounds.max);
                w.put_u32(*tick_rate);
                w
            }
            ServerMessage::WorldSnapshot(snapshot) => encode_snapshot(snapshot),
            ServerMessage::PlayerJoined { entity_id, is_bot } => {
                roster_change(ServerOpcode::PlayerJoined, *entity_id, *is_bot)
            }
            ServerMessage::PlayerLeft { entity_id, is_bot } => {
                roster_change(ServerOpcode::PlayerLeft, *entity_id, *is_bot)
            }
            ServerMessage::PlayerDeath {
                killer_id,
                victim_id,
                timestamp,
            } => {
                let mut w = BinaryWriter::with_capacity(17);
                w.put_u8(ServerOpcode::PlayerDeath as u8);
                w.put_u32(*killer_id);
                w.put_u32(*victim_id);
                w.put_u64(*timestamp);
                w
            }
            ServerMessage::RespawnComplete {
                position,
                size,
                score,
            } => {
                let mut w = BinaryWriter::with_capacity(21);
                w.put_u8(ServerOpcode::RespawnComplete as u8);
                w.put_vec2(*position);
                w.put_f32(*size);
                w.put_u64(*score);
                w
            }
            ServerMessage::RespawnRejected { reason } => {
                let mut w = BinaryWriter::with_capacity(3 + reason.len());
                w.put_u8(ServerOpcode::RespawnRejected as u8);
                w.put_string(reason);
                w
            }
        }
    }

    /// Parse a server message from raw bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = BinaryReader::new(data.to_vec());
        if r.remaining() == 0 {
            return Err(ProtocolError::Empty);
        }
        let msg = match ServerOpcode::try_from(r.read_u8()?)? {
            ServerOpcode::Welcome => {
                let entity_id = r.read_u32()?;
                let min = r.read_vec2()?;
                let max = r.read_vec2()?;
                let tick_rate = r.read_u32()?;
                ServerMessage::Welcome {
                    entity_id,
                    bounds: WorldBounds { min, max },
                    tick_rate,
                }
            }
            ServerOpcode::WorldSnapshot => ServerMessage::WorldSnapshot(decode_snapshot(&mut r)?),
            ServerOpcode::PlayerJoined => ServerMessage::PlayerJoined {
                entity_id: r.read_u32()?,
                is_bot: r.read_u8()? != 0,
            },
            ServerOpcode::PlayerLeft => ServerMessage::PlayerLeft {
                entity_id: r.read_u32()?,
                is_bot: r.read_u8()? != 0,
            },
            ServerOpcode::PlayerDeath => ServerMessage::PlayerDeath {
                killer_id: r.read_u32()?,
                victim_id: r.read_u32()?,
                timestamp: r.read_u64()?,
            },
            ServerOpcode::RespawnComplete => ServerMessage::RespawnComplete {
                position: r.read_vec2()?,
                size: r.read_f32()?,
                score: r.read_u64()?,
            },
            ServerOpcode::RespawnRejected => ServerMessage::RespawnRejected {
                reason: r.read_string()?,
            },
        };
        r.finish()?;
        Ok(msg)
    }
}

fn roster_change(op: ServerOpcode, entity_id: u32, is_bot: bool) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(6);
    w.put_u8(op as u8);
    w.put_u32(entity_id);
    w.put_u8(is_bot as u8);
    w
}

/// Snapshot layout:
/// - opcode 0x10
/// - timestamp: u64
/// - is_delta: u8
/// - entity_count: u32, then per entity:
///   id u32, x f32, y f32, size f32, score u64, flags u8, [last_input u32]
/// - pellet_count: u32, then per pellet:
///   id u32, x f32, y f32, size f32, r g b
// Smallest encoded entity (no last input) and the fixed pellet size; the
// claimed counts are never trusted for preallocation beyond what the
// payload could hold.
const MIN_ENTITY_BYTES: usize = 25;
const PELLET_BYTES: usize = 19;

fn encode_snapshot(s: &WorldSnapshot) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(18 + s.entities.len() * 33 + s.pellets.len() * 19);
    w.put_u8(ServerOpcode::WorldSnapshot as u8);
    w.put_u64(s.timestamp);
    w.put_u8(s.is_delta as u8);

    w.put_u32(s.entities.len() as u32);
    for e in &s.entities {
        w.put_u32(e.id);
        w.put_vec2(e.position);
        w.put_f32(e.size);
        w.put_u64(e.score);
        let mut flags = 0u8;
        if e.is_alive {
            flags |= FLAG_ALIVE;
        }
        if e.last_processed_input.is_some() {
            flags |= FLAG_HAS_LAST_INPUT;
        }
        w.put_u8(flags);
        if let Some(seq) = e.last_processed_input {
            w.put_u32(seq);
        }
    }

    w.put_u32(s.pellets.len() as u32);
    for p in &s.pellets {
        w.put_u32(p.id);
        w.put_vec2(p.position);
        w.put_f32(p.size);
        w.put_u8(p.color.r);
        w.put_u8(p.color.g);
        w.put_u8(p.color.b);
    }
    w
}

fn decode_snapshot(r: &mut BinaryReader) -> Result<WorldSnapshot, ProtocolError> {
    let timestamp = r.read_u64()?;
    let is_delta = r.read_u8()? != 0;

    let entity_count = r.read_u32()? as usize;
    let mut entities = Vec::with_capacity(entity_count.min(r.remaining() / MIN_ENTITY_BYTES));
    for _ in 0..entity_count {
        let id = r.read_u32()?;
        let position = r.read_vec2()?;
        let size = r.read_f32()?;
        let score = r.read_u64()?;
        let flags = r.read_u8()?;
        let last_processed_input = if flags & FLAG_HAS_LAST_INPUT != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        entities.push(EntityState {
            id,
            position,
            size,
            score,
            is_alive: flags & FLAG_ALIVE != 0,
            last_processed_input,
        });
    }

    let pellet_count = r.read_u32()? as usize;
    let mut pellets = Vec::with_capacity(pellet_count.min(r.remaining() / PELLET_BYTES));
    for _ in 0..pellet_count {
        let id = r.read_u32()?;
        let position = r.read_vec2()?;
        let size = r.read_f32()?;
        let color = Color::new(r.read_u8()?, r.read_u8()?, r.read_u8()?);
        pellets.push(PelletState {
            id,
            position,
            size,
            color,
        });
    }

    Ok(WorldSnapshot {
        timestamp,
        is_delta,
        entities,
        pellets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> WorldSnapshot {
        WorldSnapshot {
            timestamp: 1_700_000_000_123,
            is_delta: false,
            entities: vec![
                EntityState {
                    id: 1,
                    position: Vec2::new(10.0, -5.5),
                    size: 25.0,
                    score: 40,
                    is_alive: true,
                    last_processed_input: Some(17),
                },
                EntityState {
                    id: 2,
                    position: Vec2::new(0.0, 0.0),
                    size: 31.0,
                    score: 0,
                    is_alive: false,
                    last_processed_input: None,
                },
            ],
            pellets: vec![PelletState {
                id: 9,
                position: Vec2::new(3.0, 4.0),
                size: 5.0,
                color: Color::new(200, 10, 60),
            }],
        }
    }

    #[test]
    fn test_snapshot_optional_last_input() {
        let snap = sample_snapshot();
        let bytes = ServerMessage::WorldSnapshot(snap.clone()).encode().finish();
        // header 14, entity 1 with input 29, entity 2 without 25, pellet block 4 + 19
        assert_eq!(bytes.len(), 14 + 29 + 25 + 4 + 19);
        match ServerMessage::decode(&bytes).unwrap() {
            ServerMessage::WorldSnapshot(decoded) => {
                assert_eq!(decoded, snap);
                assert_eq!(decoded.entities[1].last_processed_input, None);
                assert!(!decoded.entities[1].is_alive);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_welcome_carries_bounds() {
        let msg = ServerMessage::Welcome {
            entity_id: 4,
            bounds: WorldBounds::new(2000.0, 1000.0),
            tick_rate: 30,
        };
        let bytes = msg.encode().finish();
        assert_eq!(ServerMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_truncated_snapshot_is_error() {
        let bytes = ServerMessage::WorldSnapshot(sample_snapshot()).encode().finish();
        assert_eq!(
            ServerMessage::decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_large_snapshot_keeps_every_pellet() {
        let pellets: Vec<PelletState> = (0..70_000u32)
            .map(|id| PelletState {
                id,
                position: Vec2::new(id as f32, 0.0),
                size: 5.0,
                color: Color::new(1, 2, 3),
            })
            .collect();
        let snap = WorldSnapshot {
            timestamp: 1,
            is_delta: false,
            entities: Vec::new(),
            pellets,
        };
        let bytes = ServerMessage::WorldSnapshot(snap.clone()).encode().finish();
        match ServerMessage::decode(&bytes).unwrap() {
            ServerMessage::WorldSnapshot(decoded) => {
                assert_eq!(decoded.pellets.len(), 70_000);
                assert_eq!(decoded.pellets.last(), snap.pellets.last());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inflated_count_is_error() {
        let mut w = BinaryWriter::with_capacity(16);
        w.put_u8(ServerOpcode::WorldSnapshot as u8);
        w.put_u64(0);
        w.put_u8(0);
        w.put_u32(u32::MAX);
        assert_eq!(
            ServerMessage::decode(&w.finish()),
            Err(ProtocolError::UnexpectedEof)
        );
    }
}
