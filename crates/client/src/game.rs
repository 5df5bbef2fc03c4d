//! Client game state and server message dispatch.
//!
//! Everything that mutates client state goes through `&mut ClientGame`, so a
//! snapshot-driven reconciliation can never interleave with a prediction
//! write for the same frame.

use crate::config::ClientConfig;
use crate::interpolation::{RemoteEntities, StateSample};
use crate::prediction::{LocalEntity, PredictionEngine};
use crate::reconciliation::{Correction, reconcile};
use glam::Vec2;
use protocol::packets::{Actions, ClientMessage, PelletState, ServerMessage, WorldSnapshot};
use protocol::{ProtocolError, WorldBounds};
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

// Border used until the server sends the real one.
const DEFAULT_BORDER: f32 = 4000.0;

/// A remote entity as it should be drawn this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderEntity {
    pub id: u32,
    pub position: Vec2,
    pub size: f32,
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone)]
pub struct RenderFrame<'a> {
    pub local: Option<LocalEntity>,
    pub remotes: Vec<RenderEntity>,
    pub pellets: &'a [PelletState],
}

/// Headless client: prediction for the local entity, interpolation for
/// everything else.
#[derive(Debug)]
pub struct ClientGame {
    config: ClientConfig,
    /// Entity assigned by `Welcome`.
    local_id: Option<u32>,
    /// Populated from the first snapshot that mentions `local_id`.
    local: Option<LocalEntity>,
    prediction: PredictionEngine,
    remotes: RemoteEntities,
    pellets: Vec<PelletState>,
    tick_rate: u32,
    /// Receipt time of the newest snapshot.
    last_snapshot_at: Option<u64>,
    last_correction: Option<Correction>,
}

impl ClientGame {
    pub fn new(config: ClientConfig) -> Self {
        let prediction = PredictionEngine::new(
            config.movement(),
            WorldBounds::new(DEFAULT_BORDER, DEFAULT_BORDER),
            config.pending_input_cap,
        );
        let remotes = RemoteEntities::new(config.interpolation_window_ms, config.interpolation_max_samples);
        Self {
            config,
            local_id: None,
            local: None,
            prediction,
            remotes,
            pellets: Vec::new(),
            tick_rate: 0,
            last_snapshot_at: None,
            last_correction: None,
        }
    }

    pub fn join(&self, name: &str) -> ClientMessage {
        ClientMessage::Join { name: name.to_string() }
    }

    pub fn request_respawn(&self) -> ClientMessage {
        ClientMessage::RespawnRequest
    }

    #[inline]
    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    #[inline]
    pub fn local(&self) -> Option<&LocalEntity> {
        self.local.as_ref()
    }

    #[inline]
    pub fn bounds(&self) -> &WorldBounds {
        &self.prediction.bounds
    }

    #[inline]
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    #[inline]
    pub fn pellets(&self) -> &[PelletState] {
        &self.pellets
    }

    #[inline]
    pub fn remotes(&self) -> &RemoteEntities {
        &self.remotes
    }

    #[inline]
    pub fn pending_inputs(&self) -> usize {
        self.prediction.pending.len()
    }

    #[inline]
    pub fn last_correction(&self) -> Option<Correction> {
        self.last_correction
    }

    #[inline]
    pub fn last_snapshot_at(&self) -> Option<u64> {
        self.last_snapshot_at
    }

    /// Decode and apply one binary server message received at `now`.
    pub fn handle_packet(&mut self, data: &[u8], now: u64) -> Result<(), ProtocolError> {
        let message = ServerMessage::decode(data)?;
        self.handle_message(message, now);
        Ok(())
    }

    pub fn handle_message(&mut self, message: ServerMessage, now: u64) {
        match message {
            ServerMessage::Welcome {
                entity_id,
                bounds,
                tick_rate,
            } => {
                info!("Joined as entity {} ({} Hz)", entity_id, tick_rate);
                self.local_id = Some(entity_id);
                self.local = None;
                self.prediction.bounds = bounds;
                self.prediction.pending.clear();
                self.remotes.clear();
                self.pellets.clear();
                self.tick_rate = tick_rate;
            }
            ServerMessage::WorldSnapshot(snapshot) => self.apply_snapshot(snapshot, now),
            ServerMessage::PlayerJoined { entity_id, is_bot } => {
                debug!("Entity {} joined (bot: {})", entity_id, is_bot);
            }
            ServerMessage::PlayerLeft { entity_id, is_bot } => {
                debug!("Entity {} left (bot: {})", entity_id, is_bot);
                self.remotes.remove(entity_id);
            }
            ServerMessage::PlayerDeath {
                killer_id,
                victim_id,
                ..
            } => {
                debug!("Entity {} killed entity {}", killer_id, victim_id);
                if let Some(local) = self.local.as_mut()
                    && local.id == victim_id
                {
                    local.alive = false;
                }
            }
            ServerMessage::RespawnComplete {
                position,
                size,
                score,
            } => {
                let Some(id) = self.local_id else {
                    warn!("Respawn before welcome");
                    return;
                };
                self.prediction.pending.clear();
                self.local = Some(LocalEntity {
                    id,
                    position,
                    size,
                    score,
                    alive: true,
                });
            }
            ServerMessage::RespawnRejected { reason } => {
                warn!("Respawn rejected: {}", reason);
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: WorldSnapshot, now: u64) {
        // Snapshots are stamped with receipt time; the server clock is
        // not assumed to agree with ours.
        self.last_snapshot_at = Some(now);

        for state in &snapshot.entities {
            if Some(state.id) == self.local_id {
                match self.local.as_mut() {
                    Some(local) => {
                        let correction = reconcile(
                            local,
                            state,
                            &mut self.prediction.pending,
                            &self.prediction.movement,
                            &self.prediction.bounds,
                            &self.config,
                        );
                        trace!("Reconciled local entity: {:?}", correction);
                        self.last_correction = Some(correction);
                    }
                    None => {
                        if let Some(last) = state.last_processed_input {
                            self.prediction.pending.acknowledge(last);
                        }
                        self.local = Some(LocalEntity {
                            id: state.id,
                            position: state.position,
                            size: state.size,
                            score: state.score,
                            alive: state.is_alive,
                        });
                    }
                }
                continue;
            }

            self.remotes.record(
                state.id,
                StateSample {
                    position: state.position,
                    size: state.size,
                    timestamp: now,
                },
            );
        }

        if !snapshot.is_delta {
            let roster: HashSet<u32> = snapshot.entities.iter().map(|e| e.id).collect();
            self.remotes.retain(|id| roster.contains(&id));
            self.pellets = snapshot.pellets;
        }
    }

    /// Sample the pointer, predict locally and return the message to send.
    ///
    /// Returns `None` until the local entity is known.
    pub fn sample_input(&mut self, target: Vec2, actions: Actions, now: u64) -> Option<ClientMessage> {
        let local = self.local.as_mut()?;
        let cmd = self.prediction.predict(local, target, actions, now);
        Some(ClientMessage::Input(cmd))
    }

    /// State to draw at `now`. Remotes are rendered `interpolation_delay_ms`
    /// in the past.
    pub fn render(&self, now: u64) -> RenderFrame<'_> {
        let render_time = now.saturating_sub(self.config.interpolation_delay_ms);
        let remotes = self
            .remotes
            .sample(render_time)
            .into_iter()
            .map(|(id, s)| RenderEntity {
                id,
                position: s.position,
                size: s.size,
            })
            .collect();
        RenderFrame {
            local: self.local,
            remotes,
            pellets: &self.pellets,
        }
    }
}
