//! Game state and main loop.

use bytes::Bytes;
use futures_util::FutureExt;
use glam::Vec2;
use protocol::movement::step_toward;
use protocol::packets::{ClientMessage, EntityState, InputCommand, ServerMessage, WorldSnapshot};
use protocol::{MovementParams, WorldBounds, mass_to_size};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{RwLock, broadcast};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, trace, warn};

use super::client::Session;
use super::{TargetedMessage, WorldUpdateBroadcast};
use crate::ai::BotManager;
use crate::collaborators::{AuditEvent, Collaborators, GameResult};
use crate::collision::CollisionEngine;
use crate::config::Config;
use crate::entity::{EntityKind, SizeLimits};
use crate::error::GameError;
use crate::pellets::{PelletManager, random_color};
use crate::world::World;

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pending broadcasts to send after releasing the game state lock.
#[derive(Debug, Default)]
pub struct PendingBroadcasts {
    pub world_update: Option<WorldUpdateBroadcast>,
    pub targeted: Vec<TargetedMessage>,
}

/// Main game state.
pub struct GameState {
    pub config: Config,
    pub bounds: WorldBounds,
    movement: MovementParams,
    pub tick_count: u64,

    // ID counters
    next_client_id: u32,

    // Connected clients
    pub sessions: HashMap<u32, Session>,

    // Game world (entities)
    pub world: World,
    pub pellets: PelletManager,

    // Bot manager
    pub bots: BotManager,

    collision: CollisionEngine,
    collaborators: Collaborators,
    rng: StdRng,

    // Latest pointer target per family root; split cells follow it.
    targets: HashMap<u32, Vec2>,
    // What each entity looked like in the last snapshot sent.
    last_broadcast: HashMap<u32, EntityState>,
    round_started_ms: u64,

    // World update broadcast channel
    world_tx: broadcast::Sender<WorldUpdateBroadcast>,

    // Targeted message channel
    targeted_tx: broadcast::Sender<TargetedMessage>,

    // Average tick duration in milliseconds (exponential moving average).
    pub update_time_avg: f64,
}

impl GameState {
    /// Create a new game state.
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        world_tx: broadcast::Sender<WorldUpdateBroadcast>,
        targeted_tx: broadcast::Sender<TargetedMessage>,
    ) -> Self {
        let bounds = config.bounds();
        let limits = SizeLimits {
            min: config.player.min_size,
            max: config.player.max_size,
        };

        Self {
            config: config.clone(),
            bounds,
            movement: config.movement(),
            tick_count: 0,
            next_client_id: 1,
            sessions: HashMap::new(),
            world: World::new(bounds, limits),
            pellets: PelletManager::new(config.pellet.clone(), bounds),
            bots: BotManager::new(),
            collision: CollisionEngine::new(&bounds),
            collaborators,
            rng: StdRng::from_os_rng(),
            targets: HashMap::new(),
            last_broadcast: HashMap::new(),
            round_started_ms: 0,
            world_tx,
            targeted_tx,
            update_time_avg: 0.0,
        }
    }

    /// Make every random choice reproducible.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Scatter the initial pellets and spawn the configured bots.
    pub fn init(&mut self, now_ms: u64) {
        self.round_started_ms = now_ms;
        self.pellets.populate(&mut self.rng);
        for _ in 0..self.config.server.bots {
            self.spawn_bot(now_ms);
        }
        info!(
            "World initialized: {} pellets, {} bots",
            self.pellets.len(),
            self.bots.len()
        );
    }

    fn spawn_bot(&mut self, now_ms: u64) -> u32 {
        let size = self.config.player.initial_size;
        let position =
            self.world
                .safe_spawn_position(size, self.config.player.spawn_attempts, &mut self.rng);
        let entity_id = self.world.spawn(EntityKind::Bot, position, size, now_ms);
        self.bots.add_bot(entity_id, &mut self.rng);
        let name = self
            .bots
            .get_bot(entity_id)
            .map(|b| b.name.clone())
            .unwrap_or_default();
        self.collaborators.audit.record(AuditEvent::Join {
            entity_id,
            name,
            is_bot: true,
            at_ms: now_ms,
        });
        entity_id
    }

    /// Add a new client.
    pub fn add_client(&mut self, addr: SocketAddr) -> u32 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        let session = Session::new(id, addr, self.config.player.input_queue_limit);
        self.sessions.insert(id, session);
        info!("Client {} connected from {}", id, addr);
        id
    }

    /// Remove a client along with its entity and split cells.
    pub fn remove_client(&mut self, id: u32, now_ms: u64) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        info!("Client {} ({}) disconnected", id, session.addr);
        let Some(entity_id) = session.entity_id else {
            return;
        };
        self.world.remove_splits_of(entity_id);
        self.world.remove(entity_id);
        self.targets.remove(&entity_id);
        self.collaborators.audit.record(AuditEvent::Leave {
            entity_id,
            at_ms: now_ms,
        });
        self.send_targeted(
            None,
            ServerMessage::PlayerLeft {
                entity_id,
                is_bot: false,
            },
        );
    }

    fn send_targeted(&self, client_id: Option<u32>, message: ServerMessage) {
        // No receivers is fine: nobody is connected.
        let _ = self.targeted_tx.send(TargetedMessage { client_id, message });
    }

    /// Decode and handle a packet from a client. Returns direct replies.
    pub fn handle_packet(
        &mut self,
        client_id: u32,
        data: &[u8],
        now_ms: u64,
    ) -> Result<Vec<ServerMessage>, GameError> {
        let message = ClientMessage::decode(data)?;
        self.handle_message(client_id, message, now_ms)
    }

    /// Handle a decoded client message. Returns direct replies.
    pub fn handle_message(
        &mut self,
        client_id: u32,
        message: ClientMessage,
        now_ms: u64,
    ) -> Result<Vec<ServerMessage>, GameError> {
        let session = self
            .sessions
            .get_mut(&client_id)
            .ok_or(GameError::UnknownClient(client_id))?;
        session.touch();

        match message {
            ClientMessage::Join { name } => self.handle_join(client_id, name, now_ms),
            ClientMessage::Input(cmd) => {
                if !session.has_joined() {
                    return Err(GameError::NotJoined(client_id));
                }
                if let Err(reason) = session.push_input(cmd) {
                    debug!(
                        "Client {} input {} dropped: {:?}",
                        client_id, cmd.sequence, reason
                    );
                }
                Ok(Vec::new())
            }
            ClientMessage::RespawnRequest => {
                let entity_id = session.entity_id.ok_or(GameError::NotJoined(client_id))?;
                match self.respawn_entity(entity_id, now_ms) {
                    Ok(reply) => Ok(vec![reply]),
                    Err(GameError::RespawnRejected(reason)) => {
                        debug!("Client {} respawn rejected: {}", client_id, reason);
                        Ok(vec![ServerMessage::RespawnRejected {
                            reason: reason.to_string(),
                        }])
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn handle_join(
        &mut self,
        client_id: u32,
        name: String,
        now_ms: u64,
    ) -> Result<Vec<ServerMessage>, GameError> {
        let max_len = self.config.player.max_name_length;
        let name: String = name.trim().chars().take(max_len).collect();

        let session = self
            .sessions
            .get(&client_id)
            .ok_or(GameError::UnknownClient(client_id))?;
        if session.has_joined() {
            return Err(GameError::AlreadyJoined(client_id));
        }
        if !self.collaborators.gate.authorize(&name) {
            return Err(GameError::JoinRejected(name));
        }

        let size = self.config.player.initial_size;
        let position =
            self.world
                .safe_spawn_position(size, self.config.player.spawn_attempts, &mut self.rng);
        let entity_id = self
            .world
            .spawn(EntityKind::Player { client_id }, position, size, now_ms);

        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.entity_id = Some(entity_id);
            session.name = name.clone();
            session.target = position;
        }
        self.targets.insert(entity_id, position);

        info!("Client {} joined as '{}' (entity {})", client_id, name, entity_id);
        self.collaborators.audit.record(AuditEvent::Join {
            entity_id,
            name,
            is_bot: false,
            at_ms: now_ms,
        });
        self.send_targeted(
            None,
            ServerMessage::PlayerJoined {
                entity_id,
                is_bot: false,
            },
        );

        Ok(vec![ServerMessage::Welcome {
            entity_id,
            bounds: self.bounds,
            tick_rate: self.config.server.tick_rate,
        }])
    }

    /// Bring a dead entity back at a safe spot. Alive entities are refused.
    pub fn respawn_entity(&mut self, entity_id: u32, now_ms: u64) -> Result<ServerMessage, GameError> {
        let entity = self
            .world
            .get(entity_id)
            .ok_or(GameError::EntityNotFound(entity_id))?;
        if entity.alive {
            return Err(GameError::RespawnRejected("entity is still alive"));
        }
        if entity.is_split() {
            return Err(GameError::RespawnRejected("split cells do not respawn"));
        }

        let size = self.config.player.initial_size;
        let position =
            self.world
                .safe_spawn_position(size, self.config.player.spawn_attempts, &mut self.rng);
        self.world.remove_splits_of(entity_id);

        let penalty = self.config.player.respawn_score_penalty;
        let entity = self
            .world
            .get_mut(entity_id)
            .ok_or(GameError::EntityNotFound(entity_id))?;
        entity.respawn(position, size, penalty, now_ms);
        let reply = ServerMessage::RespawnComplete {
            position: entity.position,
            size: entity.size(),
            score: entity.score,
        };
        self.targets.insert(entity_id, position);
        debug!("Entity {} respawned at {:?}", entity_id, position);
        Ok(reply)
    }

    /// Run one simulation step at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> PendingBroadcasts {
        let tick_start = std::time::Instant::now();
        self.tick_count += 1;
        let mut pending = PendingBroadcasts::default();

        // Player inputs
        let input_start = std::time::Instant::now();
        self.process_inputs(now_ms);

        // Bots
        let commands = self.bots.update(
            &self.world,
            self.pellets.pellets(),
            &self.config,
            now_ms,
            &mut self.rng,
        );
        for (entity_id, cmd) in commands {
            self.apply_command(entity_id, &cmd, now_ms);
        }
        let input_time = input_start.elapsed();

        // Split cells
        let movement_start = std::time::Instant::now();
        self.update_splits(now_ms);
        let movement_time = movement_start.elapsed();

        // Collision detection and eating
        let collision_start = std::time::Instant::now();
        self.process_collisions(now_ms, &mut pending);
        let collision_time = collision_start.elapsed();

        self.process_respawns(now_ms, &mut pending);

        let added = self.pellets.regenerate(self.world.entities(), &mut self.rng);
        if added > 0 {
            trace!("Tick #{}: {} pellets added", self.tick_count, added);
        }

        // Prepare world state broadcast
        let broadcast_start = std::time::Instant::now();
        pending.world_update = Some(self.prepare_world_broadcast(now_ms));
        let broadcast_time = broadcast_start.elapsed();

        self.check_round_end(now_ms);

        // Log performance metrics every 300 ticks
        if self.tick_count % 300 == 0 {
            debug!(
                "Tick #{}: {:.2}ms total | input={:.2}ms move={:.2}ms collision={:.2}ms broadcast={:.2}ms | {} entities, {} pellets, {} clients",
                self.tick_count,
                tick_start.elapsed().as_secs_f64() * 1000.0,
                input_time.as_secs_f64() * 1000.0,
                movement_time.as_secs_f64() * 1000.0,
                collision_time.as_secs_f64() * 1000.0,
                broadcast_time.as_secs_f64() * 1000.0,
                self.world.len(),
                self.pellets.len(),
                self.sessions.len()
            );
        }

        pending
    }

    /// Drain every session's queue and apply the commands in order.
    fn process_inputs(&mut self, now_ms: u64) {
        let mut client_ids: Vec<u32> = self.sessions.keys().copied().collect();
        client_ids.sort_unstable();

        for client_id in client_ids {
            let Some(session) = self.sessions.get_mut(&client_id) else {
                continue;
            };
            let Some(entity_id) = session.entity_id else {
                continue;
            };
            let commands = session.drain_inputs();
            for cmd in &commands {
                self.apply_command(entity_id, cmd, now_ms);
            }
            // Dead entities still acknowledge their inputs.
            if let (Some(last), Some(session)) = (commands.last(), self.sessions.get_mut(&client_id)) {
                session.mark_processed(last);
            }
        }
    }

    /// Move an entity one step toward the command target and honour its actions.
    fn apply_command(&mut self, entity_id: u32, cmd: &InputCommand, now_ms: u64) {
        let Some(entity) = self.world.get_mut(entity_id) else {
            warn!("Command for missing entity {}", entity_id);
            return;
        };
        if !entity.alive {
            return;
        }
        entity.position = step_toward(
            entity.position,
            entity.size(),
            cmd.target,
            &self.movement,
            &self.bounds,
        );
        self.targets.insert(entity_id, cmd.target);

        if cmd.actions.split {
            self.split(entity_id, cmd.target, now_ms);
        }
        if cmd.actions.eject {
            self.eject(entity_id, cmd.target);
        }
    }

    /// Halve a root's mass into a new split cell launched toward `target`.
    fn split(&mut self, root_id: u32, target: Vec2, now_ms: u64) {
        let player = &self.config.player;
        let Some(root) = self.world.get(root_id) else {
            return;
        };
        if !root.alive || root.is_split() || root.size() < player.min_split_size {
            return;
        }
        if self.world.family_size(root_id) >= player.max_cells {
            return;
        }

        let half = root.mass() / 2.0;
        let position = root.position;
        let direction = match (target - position).try_normalize() {
            Some(d) => d,
            None => Vec2::X,
        };
        let kind = EntityKind::Split {
            parent_id: root_id,
            merge_at_ms: now_ms + player.merge_cooldown_ms,
        };
        let boost = player.split_boost;

        if let Some(root) = self.world.get_mut(root_id) {
            root.set_mass(half);
        }
        let split_id = self.world.spawn(kind, position, mass_to_size(half), now_ms);
        if let Some(split) = self.world.get_mut(split_id) {
            split.set_boost(boost, direction);
        }
        trace!("Entity {} split into {}", root_id, split_id);
    }

    /// Shed a little mass as a pellet in front of the entity.
    fn eject(&mut self, entity_id: u32, target: Vec2) {
        let player = &self.config.player;
        let Some(entity) = self.world.get_mut(entity_id) else {
            return;
        };
        if !entity.alive || entity.size() < player.min_eject_size {
            return;
        }
        let direction = match (target - entity.position).try_normalize() {
            Some(d) => d,
            None => Vec2::X,
        };
        entity.set_mass(entity.mass() - player.eject_mass);

        let pellet_size = mass_to_size(player.eject_mass);
        // Far enough out that the ejector cannot swallow it straight back.
        let gap = (entity.size() + pellet_size) * self.config.combat.latency_compensation + 1.0;
        let position = entity.position + direction * gap;
        let color = random_color(&mut self.rng);
        self.pellets
            .insert(position, pellet_size, color, player.eject_value);
    }

    /// Advance boosts, steer split cells after their root and merge ripe ones.
    fn update_splits(&mut self, now_ms: u64) {
        let bounds = self.bounds;
        let mut merges: Vec<(u32, u32)> = Vec::new();
        let roots: HashMap<u32, (Vec2, f32)> = self
            .world
            .entities()
            .iter()
            .filter(|e| e.alive && !e.is_split())
            .map(|e| (e.id, (e.position, e.size())))
            .collect();

        for entity in self.world.entities_mut() {
            let EntityKind::Split {
                parent_id,
                merge_at_ms,
            } = entity.kind
            else {
                continue;
            };
            if !entity.alive {
                continue;
            }
            if !entity.update_boost(&bounds)
                && let Some(&target) = self.targets.get(&parent_id)
            {
                entity.position =
                    step_toward(entity.position, entity.size(), target, &self.movement, &bounds);
            }
            if now_ms >= merge_at_ms
                && let Some(&(root_pos, root_size)) = roots.get(&parent_id)
                && entity.position.distance(root_pos) < root_size
            {
                merges.push((entity.id, parent_id));
            }
        }

        for (split_id, parent_id) in merges {
            let Some(split) = self.world.remove(split_id) else {
                continue;
            };
            if let Some(parent) = self.world.get_mut(parent_id) {
                parent.set_mass(parent.mass() + split.mass());
                parent.score += split.score;
                trace!("Split {} merged back into {}", split_id, parent_id);
            }
        }
    }

    fn process_collisions(&mut self, now_ms: u64, pending: &mut PendingBroadcasts) {
        let report = self.collision.resolve(
            self.world.entities_mut(),
            self.pellets.pellets(),
            &self.config.combat,
            now_ms,
        );
        if report.is_empty() {
            return;
        }
        self.pellets.remove_consumed(&report.consumed);

        let audit = &self.collaborators.audit;
        for &(entity_id, pellet_id) in &report.pellets_eaten {
            audit.record(AuditEvent::PelletEaten {
                entity_id,
                pellet_id,
                at_ms: now_ms,
            });
        }

        for kill in &report.kills {
            let killer_id = kill.killer_id;
            audit.record(AuditEvent::Kill {
                killer_id,
                victim_id: kill.prey_id,
                at_ms: now_ms,
            });

            let prey_is_root = self.world.get(kill.prey_id).is_some_and(|e| !e.is_split());
            if prey_is_root {
                debug!("Entity {} eaten by {}", kill.prey_id, killer_id);
                self.world.remove_splits_of(kill.prey_id);
                pending.targeted.push(TargetedMessage {
                    client_id: None,
                    message: ServerMessage::PlayerDeath {
                        killer_id,
                        victim_id: kill.prey_id,
                        timestamp: now_ms,
                    },
                });
            }
        }
        self.world.remove_dead_splits();
    }

    /// Respawn roots that have been dead for longer than the respawn delay.
    fn process_respawns(&mut self, now_ms: u64, pending: &mut PendingBroadcasts) {
        let delay = self.config.player.respawn_delay_ms;
        let due: Vec<(u32, Option<u32>)> = self
            .world
            .entities()
            .iter()
            .filter(|e| !e.alive && !e.is_split())
            .filter(|e| e.death.is_some_and(|d| now_ms.saturating_sub(d.at_ms) >= delay))
            .map(|e| (e.id, e.client_id()))
            .collect();

        for (entity_id, client_id) in due {
            match self.respawn_entity(entity_id, now_ms) {
                Ok(reply) => {
                    if let Some(client_id) = client_id {
                        pending.targeted.push(TargetedMessage {
                            client_id: Some(client_id),
                            message: reply,
                        });
                    }
                }
                Err(e) => warn!("Auto-respawn of {} failed: {}", entity_id, e),
            }
        }
    }

    fn entity_states(&self) -> Vec<EntityState> {
        self.world
            .entities()
            .iter()
            .map(|e| EntityState {
                id: e.id,
                position: e.position,
                size: e.size(),
                score: e.score,
                is_alive: e.alive,
                last_processed_input: e
                    .client_id()
                    .and_then(|c| self.sessions.get(&c))
                    .and_then(|s| s.last_processed_input),
            })
            .collect()
    }

    /// Prepare the world state broadcast: full every N ticks, deltas otherwise.
    fn prepare_world_broadcast(&mut self, now_ms: u64) -> WorldUpdateBroadcast {
        let states = self.entity_states();
        let interval = self.config.server.full_snapshot_interval.max(1);
        let is_delta = self.tick_count % interval != 0;

        let snapshot = if is_delta {
            let changed: Vec<EntityState> = states
                .into_iter()
                .filter(|s| self.last_broadcast.get(&s.id) != Some(s))
                .collect();
            for state in &changed {
                self.last_broadcast.insert(state.id, *state);
            }
            WorldSnapshot {
                timestamp: now_ms,
                is_delta: true,
                entities: changed,
                pellets: Vec::new(),
            }
        } else {
            self.last_broadcast = states.iter().map(|s| (s.id, *s)).collect();
            WorldSnapshot {
                timestamp: now_ms,
                is_delta: false,
                entities: states,
                pellets: self.pellets.pellets().iter().map(|p| p.state()).collect(),
            }
        };

        let payload: Bytes = ServerMessage::WorldSnapshot(snapshot).encode().finish();
        WorldUpdateBroadcast {
            tick: self.tick_count,
            is_delta,
            payload,
        }
    }

    /// Close the round when its time is up and hand results to the stats sink.
    fn check_round_end(&mut self, now_ms: u64) {
        let duration_ms = self.config.round.duration_secs * 1000;
        if duration_ms == 0 || now_ms.saturating_sub(self.round_started_ms) < duration_ms {
            return;
        }

        let roots: Vec<_> = self
            .world
            .entities()
            .iter()
            .filter(|e| !e.is_split())
            .collect();
        // First entity with the top score wins; ties go to the older entity.
        let winner = roots
            .iter()
            .fold(None::<(u32, u64)>, |best, e| match best {
                Some((_, score)) if score >= e.score => best,
                _ => Some((e.id, e.score)),
            })
            .map(|(id, _)| id);

        let prize = self.config.round.prize_pool;
        let results: Vec<GameResult> = roots
            .iter()
            .map(|e| {
                let won = Some(e.id) == winner;
                let name = match e.kind {
                    EntityKind::Player { client_id } => self
                        .sessions
                        .get(&client_id)
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    _ => self
                        .bots
                        .get_bot(e.id)
                        .map(|b| b.name.clone())
                        .unwrap_or_default(),
                };
                GameResult {
                    entity_id: e.id,
                    name,
                    is_bot: e.is_bot(),
                    won,
                    score: e.score,
                    kills: e.stats.kills,
                    deaths: e.stats.deaths,
                    survival_time_ms: e.survival_ms(now_ms),
                    max_size: e.stats.max_size,
                    earnings: if won { prize } else { 0.0 },
                }
            })
            .collect();

        info!("Round ended after {} ticks", self.tick_count);
        self.collaborators.stats.record_game(results);

        for entity in self.world.entities_mut() {
            entity.score = 0;
            entity.stats.kills = 0;
            entity.stats.deaths = 0;
            entity.stats.survived_ms = 0;
            entity.stats.life_started_ms = now_ms;
            entity.stats.joined_at_ms = now_ms;
            entity.stats.max_size = entity.size();
        }
        self.round_started_ms = now_ms;
    }
}

/// Run one tick, turning a panic into an empty tick so the loop keeps going.
pub fn run_tick_guarded(game: &mut GameState, now_ms: u64) -> PendingBroadcasts {
    match std::panic::catch_unwind(AssertUnwindSafe(|| game.tick(now_ms))) {
        Ok(broadcasts) => broadcasts,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            error!("Tick #{} panicked: {}", game.tick_count, reason);
            PendingBroadcasts::default()
        }
    }
}

/// Run the main game loop.
pub async fn run_game_loop(state: Arc<RwLock<GameState>>, tick_interval_ms: u64) {
    let start = Instant::now() + Duration::from_millis(tick_interval_ms);
    let mut ticker = interval_at(start, Duration::from_millis(tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Initial spawn
    {
        let mut game = state.write().await;
        info!("Initial world spawn...");
        game.init(unix_millis());
    }

    loop {
        let scheduled = ticker.tick().await;

        // Drain any backlog of tick events so we always process the most recent tick.
        let mut skipped = 0u32;
        while ticker.tick().now_or_never().is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            debug!(
                "Skipped {} ticks to stay current (lag: {:?})",
                skipped,
                Instant::now().saturating_duration_since(scheduled)
            );
        }

        // Run tick and extract pending broadcasts
        let (broadcasts, world_tx, targeted_tx) = {
            let mut game = state.write().await;
            let tick_start = std::time::Instant::now();
            let now_ms = unix_millis();
            let broadcasts = run_tick_guarded(&mut *game, now_ms);
            let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;

            game.update_time_avg = game.update_time_avg * 0.5 + tick_ms * 0.5;

            let tick_budget = tick_interval_ms as f64 * 0.9;
            if tick_ms > tick_budget {
                warn!(
                    "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} clients, {} entities",
                    game.tick_count,
                    tick_ms,
                    tick_budget,
                    game.sessions.len(),
                    game.world.len()
                );
            }

            (broadcasts, game.world_tx.clone(), game.targeted_tx.clone())
        }; // Write lock released here

        if let Some(world_update) = broadcasts.world_update {
            let _ = world_tx.send(world_update);
        }
        for message in broadcasts.targeted {
            let _ = targeted_tx.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChannelAudit, JoinGate, StatsSink};
    use protocol::packets::Actions;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.pellet.target_count = 0;
        config.server.bots = 0;
        config
    }

    struct Harness {
        game: GameState,
        world_rx: broadcast::Receiver<WorldUpdateBroadcast>,
        targeted_rx: broadcast::Receiver<TargetedMessage>,
    }

    fn harness_with(config: Config, collaborators: Collaborators) -> Harness {
        let (world_tx, world_rx) = broadcast::channel(64);
        let (targeted_tx, targeted_rx) = broadcast::channel(64);
        let mut game = GameState::new(&config, collaborators, world_tx, targeted_tx);
        game.seed_rng(42);
        game.init(0);
        Harness {
            game,
            world_rx,
            targeted_rx,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), Collaborators::default())
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    /// Connect and join, returning (client_id, entity_id).
    fn join(game: &mut GameState, name: &str) -> (u32, u32) {
        let client_id = game.add_client(addr());
        let replies = game
            .handle_message(
                client_id,
                ClientMessage::Join {
                    name: name.to_string(),
                },
                0,
            )
            .unwrap();
        match replies.as_slice() {
            [ServerMessage::Welcome { entity_id, .. }] => (client_id, *entity_id),
            other => panic!("unexpected replies {:?}", other),
        }
    }

    fn input(sequence: u32, target: Vec2) -> ClientMessage {
        ClientMessage::Input(InputCommand {
            sequence,
            timestamp: 0,
            target,
            actions: Actions::NONE,
        })
    }

    fn last_snapshot(rx: &mut broadcast::Receiver<WorldUpdateBroadcast>) -> WorldSnapshot {
        let mut last = None;
        while let Ok(update) = rx.try_recv() {
            last = Some(update);
        }
        match ServerMessage::decode(&last.expect("no snapshot").payload).unwrap() {
            ServerMessage::WorldSnapshot(s) => s,
            other => panic!("unexpected message {:?}", other),
        }
    }

    fn send_all(game: &GameState, pending: PendingBroadcasts) {
        if let Some(update) = pending.world_update {
            let _ = game.world_tx.send(update);
        }
        for message in pending.targeted {
            let _ = game.targeted_tx.send(message);
        }
    }

    #[test]
    fn test_join_creates_entity_and_welcomes() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        let entity = h.game.world.get(entity_id).unwrap();
        assert!(entity.alive);
        assert_eq!(entity.size(), 25.0);
        assert_eq!(entity.client_id(), Some(client_id));
        assert!(matches!(
            h.targeted_rx.try_recv().unwrap().message,
            ServerMessage::PlayerJoined { is_bot: false, .. }
        ));

        let again = h.game.handle_message(
            client_id,
            ClientMessage::Join {
                name: "alice".into(),
            },
            0,
        );
        assert!(matches!(again, Err(GameError::AlreadyJoined(_))));
    }

    #[test]
    fn test_input_before_join_is_refused() {
        let mut h = harness();
        let client_id = h.game.add_client(addr());
        let result = h.game.handle_message(client_id, input(1, Vec2::ZERO), 0);
        assert!(matches!(result, Err(GameError::NotJoined(_))));
    }

    #[test]
    fn test_join_gate_can_refuse() {
        struct NoBobs;
        impl JoinGate for NoBobs {
            fn authorize(&self, name: &str) -> bool {
                name != "bob"
            }
        }
        let collaborators = Collaborators {
            gate: Arc::new(NoBobs),
            ..Collaborators::default()
        };
        let mut h = harness_with(test_config(), collaborators);
        let client_id = h.game.add_client(addr());
        let result =
            h.game
                .handle_message(client_id, ClientMessage::Join { name: "bob".into() }, 0);
        assert!(matches!(result, Err(GameError::JoinRejected(_))));
        assert!(h.game.world.is_empty());
    }

    #[test]
    fn test_inputs_move_and_are_acknowledged() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        h.game.world.get_mut(entity_id).unwrap().position = Vec2::ZERO;

        h.game
            .handle_message(client_id, input(1, Vec2::new(100.0, 0.0)), 0)
            .unwrap();
        h.game
            .handle_message(client_id, input(2, Vec2::new(100.0, 0.0)), 0)
            .unwrap();
        let pending = h.game.tick(33);
        send_all(&h.game, pending);

        let pos = h.game.world.get(entity_id).unwrap().position;
        assert!((pos.x - 12.0).abs() < 1e-4);
        let snapshot = last_snapshot(&mut h.world_rx);
        assert!(!snapshot.is_delta);
        let me = snapshot.entities.iter().find(|e| e.id == entity_id).unwrap();
        assert_eq!(me.last_processed_input, Some(2));
        assert_eq!(me.position, pos);
    }

    #[test]
    fn test_dead_entity_inputs_are_acknowledged_without_effect() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        let before = h.game.world.get(entity_id).unwrap().position;
        h.game.world.get_mut(entity_id).unwrap().kill(0, 0);

        h.game
            .handle_message(client_id, input(7, before + Vec2::new(50.0, 0.0)), 0)
            .unwrap();
        h.game.tick(10);

        assert_eq!(h.game.world.get(entity_id).unwrap().position, before);
        assert_eq!(
            h.game.sessions[&client_id].last_processed_input,
            Some(7)
        );
    }

    #[test]
    fn test_respawn_alive_is_rejected() {
        let mut h = harness();
        let (client_id, _) = join(&mut h.game, "alice");
        let replies = h
            .game
            .handle_message(client_id, ClientMessage::RespawnRequest, 0)
            .unwrap();
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::RespawnRejected { .. }]
        ));
    }

    #[test]
    fn test_manual_respawn_resets_size_and_penalises_score() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        {
            let entity = h.game.world.get_mut(entity_id).unwrap();
            entity.set_size(80.0);
            entity.score = 1000;
            entity.kill(99, 0);
        }
        let replies = h
            .game
            .handle_message(client_id, ClientMessage::RespawnRequest, 10)
            .unwrap();
        match replies.as_slice() {
            [ServerMessage::RespawnComplete { size, score, .. }] => {
                assert_eq!(*size, 25.0);
                assert_eq!(*score, 750);
            }
            other => panic!("unexpected replies {:?}", other),
        }
        assert!(h.game.world.get(entity_id).unwrap().alive);
    }

    #[test]
    fn test_kill_emits_death_and_auto_respawns() {
        let (audit, mut audit_rx) = ChannelAudit::new();
        let collaborators = Collaborators {
            audit: Arc::new(audit),
            ..Collaborators::default()
        };
        let mut h = harness_with(test_config(), collaborators);
        let (_, big) = join(&mut h.game, "big");
        let (victim_client, small) = join(&mut h.game, "small");
        while h.targeted_rx.try_recv().is_ok() {}

        {
            let b = h.game.world.get_mut(big).unwrap();
            b.position = Vec2::ZERO;
            b.set_size(50.0);
        }
        {
            let s = h.game.world.get_mut(small).unwrap();
            s.position = Vec2::new(5.0, 0.0);
            s.set_size(40.0);
        }

        let pending = h.game.tick(1000);
        assert!(!h.game.world.get(small).unwrap().alive);
        assert!(pending.targeted.iter().any(|m| matches!(
            m.message,
            ServerMessage::PlayerDeath { killer_id, victim_id, timestamp: 1000 }
                if killer_id == big && victim_id == small
        )));
        let mut saw_kill = false;
        while let Ok(event) = audit_rx.try_recv() {
            if let AuditEvent::Kill {
                killer_id,
                victim_id,
                ..
            } = event
            {
                saw_kill = killer_id == big && victim_id == small;
            }
        }
        assert!(saw_kill);

        // Still inside the respawn delay.
        let pending = h.game.tick(2000);
        assert!(pending.targeted.is_empty());
        assert!(!h.game.world.get(small).unwrap().alive);

        let pending = h.game.tick(4000);
        assert!(h.game.world.get(small).unwrap().alive);
        assert!(pending.targeted.iter().any(|m| m.client_id == Some(victim_client)
            && matches!(m.message, ServerMessage::RespawnComplete { .. })));
    }

    #[test]
    fn test_disconnect_removes_entity_and_splits() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        {
            let e = h.game.world.get_mut(entity_id).unwrap();
            e.set_size(100.0);
        }
        let target = h.game.world.get(entity_id).unwrap().position + Vec2::new(100.0, 0.0);
        h.game
            .handle_message(
                client_id,
                ClientMessage::Input(InputCommand {
                    sequence: 1,
                    timestamp: 0,
                    target,
                    actions: Actions {
                        split: true,
                        eject: false,
                    },
                }),
                0,
            )
            .unwrap();
        h.game.tick(10);
        assert_eq!(h.game.world.family_size(entity_id), 2);

        h.game.remove_client(client_id, 20);
        assert!(h.game.world.is_empty());
        assert!(h.game.sessions.is_empty());
    }

    #[test]
    fn test_split_halves_mass_and_merges_back() {
        let mut config = test_config();
        config.player.merge_cooldown_ms = 1000;
        config.player.split_boost = 0.0;
        let mut h = harness_with(config, Collaborators::default());
        let (client_id, root) = join(&mut h.game, "alice");
        {
            let e = h.game.world.get_mut(root).unwrap();
            e.position = Vec2::ZERO;
            e.set_size(100.0);
        }
        h.game
            .handle_message(
                client_id,
                ClientMessage::Input(InputCommand {
                    sequence: 1,
                    timestamp: 0,
                    target: Vec2::ZERO,
                    actions: Actions {
                        split: true,
                        eject: false,
                    },
                }),
                0,
            )
            .unwrap();
        h.game.tick(0);

        assert_eq!(h.game.world.len(), 2);
        let total: f32 = h.game.world.entities().iter().map(|e| e.mass()).sum();
        assert!((total - 100.0).abs() < 1e-3);
        // Family members overlap without eating each other.
        assert!(h.game.world.entities().iter().all(|e| e.alive));

        h.game.tick(500);
        assert_eq!(h.game.world.len(), 2);
        h.game.tick(1500);
        assert_eq!(h.game.world.len(), 1);
        assert!((h.game.world.get(root).unwrap().mass() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_eject_spawns_pellet() {
        let mut h = harness();
        let (client_id, entity_id) = join(&mut h.game, "alice");
        {
            let e = h.game.world.get_mut(entity_id).unwrap();
            e.position = Vec2::ZERO;
            e.set_size(60.0);
        }
        h.game
            .handle_message(
                client_id,
                ClientMessage::Input(InputCommand {
                    sequence: 1,
                    timestamp: 0,
                    target: Vec2::new(500.0, 0.0),
                    actions: Actions {
                        split: false,
                        eject: true,
                    },
                }),
                0,
            )
            .unwrap();
        h.game.tick(10);

        assert_eq!(h.game.pellets.len(), 1);
        let e = h.game.world.get(entity_id).unwrap();
        assert!((e.mass() - 34.0).abs() < 1e-3);
        assert!(h.game.pellets.pellets()[0].position.x > e.position.x);
    }

    #[test]
    fn test_delta_snapshots_carry_only_changes() {
        let mut config = test_config();
        config.server.full_snapshot_interval = 10;
        let mut h = harness_with(config, Collaborators::default());
        let (client_id, mover) = join(&mut h.game, "mover");
        let (_, idle) = join(&mut h.game, "idle");

        // Tick 1 is a delta against nothing, so everything is new.
        let pending = h.game.tick(10);
        send_all(&h.game, pending);
        let first = last_snapshot(&mut h.world_rx);
        assert!(first.is_delta);
        assert_eq!(first.entities.len(), 2);

        let target = h.game.world.get(mover).unwrap().position + Vec2::new(50.0, 0.0);
        h.game.handle_message(client_id, input(1, target), 10).unwrap();
        let pending = h.game.tick(20);
        send_all(&h.game, pending);
        let delta = last_snapshot(&mut h.world_rx);
        assert!(delta.is_delta);
        assert!(delta.pellets.is_empty());
        let ids: Vec<u32> = delta.entities.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![mover]);
        assert!(!ids.contains(&idle));
    }

    #[test]
    fn test_round_end_reports_results_once() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<Vec<GameResult>>>);
        impl StatsSink for Recorder {
            fn record_game(&self, results: Vec<GameResult>) {
                self.0.lock().unwrap().push(results);
            }
        }

        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators {
            stats: recorder.clone(),
            ..Collaborators::default()
        };
        let mut config = test_config();
        config.round.duration_secs = 1;
        config.round.prize_pool = 5.0;
        let mut h = harness_with(config, collaborators);
        let (_, a) = join(&mut h.game, "a");
        let (_, b) = join(&mut h.game, "b");
        h.game.world.get_mut(a).unwrap().score = 10;
        h.game.world.get_mut(b).unwrap().score = 30;

        h.game.tick(500);
        assert!(recorder.0.lock().unwrap().is_empty());
        h.game.tick(1000);
        h.game.tick(1100);

        let rounds = recorder.0.lock().unwrap();
        assert_eq!(rounds.len(), 1);
        let winner = rounds[0].iter().find(|r| r.won).unwrap();
        assert_eq!(winner.entity_id, b);
        assert_eq!(winner.name, "b");
        assert_eq!(winner.earnings, 5.0);
        assert_eq!(rounds[0].iter().filter(|r| r.won).count(), 1);
        assert!(h.game.world.entities().iter().all(|e| e.score == 0));
    }

    #[test]
    fn test_split_kill_counts_for_root_in_round_results() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<Vec<GameResult>>>);
        impl StatsSink for Recorder {
            fn record_game(&self, results: Vec<GameResult>) {
                self.0.lock().unwrap().push(results);
            }
        }

        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators {
            stats: recorder.clone(),
            ..Collaborators::default()
        };
        let mut config = test_config();
        config.player.merge_cooldown_ms = 1000;
        config.player.split_boost = 0.0;
        config.round.duration_secs = 2;
        let mut h = harness_with(config, collaborators);
        let (client_id, root) = join(&mut h.game, "alice");
        {
            let e = h.game.world.get_mut(root).unwrap();
            e.position = Vec2::ZERO;
            e.set_size(200.0);
        }
        h.game
            .handle_message(
                client_id,
                ClientMessage::Input(InputCommand {
                    sequence: 1,
                    timestamp: 0,
                    target: Vec2::ZERO,
                    actions: Actions {
                        split: true,
                        eject: false,
                    },
                }),
                0,
            )
            .unwrap();
        h.game.tick(0);

        let split = h
            .game
            .world
            .entities()
            .iter()
            .find(|e| e.is_split())
            .map(|e| e.id)
            .unwrap();
        h.game.world.get_mut(split).unwrap().position = Vec2::new(1000.0, 0.0);
        let prey = h.game.world.spawn(EntityKind::Bot, Vec2::new(998.0, 0.0), 40.0, 0);

        let pending = h.game.tick(100);
        assert!(!h.game.world.get(prey).unwrap().alive);
        assert!(pending.targeted.iter().any(|m| matches!(
            m.message,
            ServerMessage::PlayerDeath { killer_id, victim_id, .. }
                if killer_id == root && victim_id == prey
        )));
        assert_eq!(h.game.world.get(root).unwrap().stats.kills, 1);

        // Bring the split home and let it merge.
        h.game.world.get_mut(split).unwrap().position = Vec2::ZERO;
        h.game.tick(1500);
        assert!(h.game.world.get(split).is_none());
        let r = h.game.world.get(root).unwrap();
        assert_eq!(r.stats.kills, 1);
        assert!(r.score > 0);

        h.game.tick(2000);
        let rounds = recorder.0.lock().unwrap();
        assert_eq!(rounds.len(), 1);
        let result = rounds[0].iter().find(|r| r.entity_id == root).unwrap();
        assert_eq!(result.kills, 1);
        assert!(result.won);
    }

    #[test]
    fn test_panicking_tick_is_contained() {
        struct FlakyStats(AtomicBool);
        impl StatsSink for FlakyStats {
            fn record_game(&self, _results: Vec<GameResult>) {
                if !self.0.swap(true, Ordering::SeqCst) {
                    panic!("stats backend unavailable");
                }
            }
        }

        let stats = Arc::new(FlakyStats(AtomicBool::new(false)));
        let collaborators = Collaborators {
            stats: stats.clone(),
            ..Collaborators::default()
        };
        let mut config = test_config();
        config.round.duration_secs = 1;
        let mut h = harness_with(config, collaborators);
        join(&mut h.game, "alice");

        let pending = run_tick_guarded(&mut h.game, 1000);
        assert!(pending.world_update.is_none());
        assert!(pending.targeted.is_empty());
        assert_eq!(h.game.tick_count, 1);

        let pending = run_tick_guarded(&mut h.game, 1033);
        assert_eq!(h.game.tick_count, 2);
        let update = pending.world_update.expect("tick after a panic still broadcasts");
        assert_eq!(update.tick, 2);
        assert!(stats.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bots_spawn_and_move() {
        let mut config = test_config();
        config.server.bots = 3;
        config.pellet.target_count = 50;
        let mut h = harness_with(config, Collaborators::default());
        assert_eq!(h.game.bots.len(), 3);
        assert_eq!(h.game.world.len(), 3);
        assert_eq!(h.game.pellets.len(), 50);

        let before: Vec<Vec2> = h.game.world.entities().iter().map(|e| e.position).collect();
        h.game.tick(33);
        let after: Vec<Vec2> = h.game.world.entities().iter().map(|e| e.position).collect();
        assert_ne!(before, after);
    }

    #[test]
    fn test_malformed_packet_is_an_error() {
        let mut h = harness();
        let client_id = h.game.add_client(addr());
        let result = h.game.handle_packet(client_id, &[0xFF], 0);
        assert!(matches!(result, Err(GameError::Protocol(_))));
        assert!(h.game.handle_packet(client_id, &[], 0).is_err());
    }
}
