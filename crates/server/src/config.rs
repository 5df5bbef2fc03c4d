//! Server configuration.

use protocol::{MovementParams, WorldBounds};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub border: BorderConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub pellet: PelletConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    #[serde(default)]
    pub round: RoundConfig,
}

impl Config {
    /// Load configuration from `path`, writing the defaults there if it is missing.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let player = &self.player;
        anyhow::ensure!(
            player.min_size > 0.0 && player.min_size <= player.max_size,
            "player.min_size ({}) must be positive and at most player.max_size ({})",
            player.min_size,
            player.max_size
        );
        anyhow::ensure!(
            (player.min_size..=player.max_size).contains(&player.initial_size),
            "player.initial_size ({}) must lie within [{}, {}]",
            player.initial_size,
            player.min_size,
            player.max_size
        );
        let pellet = &self.pellet;
        anyhow::ensure!(
            pellet.min_size > 0.0 && pellet.min_size <= pellet.max_size,
            "pellet.min_size ({}) must be positive and at most pellet.max_size ({})",
            pellet.min_size,
            pellet.max_size
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&pellet.regen_threshold),
            "pellet.regen_threshold ({}) must be within [0, 1]",
            pellet.regen_threshold
        );
        anyhow::ensure!(
            self.border.width > 0.0 && self.border.height > 0.0,
            "border must have a positive size"
        );
        anyhow::ensure!(self.server.tick_rate > 0, "server.tick_rate must be positive");
        Ok(())
    }

    pub fn bounds(&self) -> WorldBounds {
        WorldBounds::new(self.border.width, self.border.height)
    }

    pub fn movement(&self) -> MovementParams {
        MovementParams {
            base_speed: self.player.speed,
            speed_floor: self.player.speed_floor,
            reference_size: self.player.initial_size,
        }
    }

    /// Milliseconds between ticks.
    pub fn tick_interval_ms(&self) -> u64 {
        1000 / u64::from(self.server.tick_rate.max(1))
    }
}

/// Server networking and loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum simultaneous connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Simulation ticks per second.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Number of bots to keep in the arena.
    #[serde(default)]
    pub bots: usize,
    /// A full snapshot every N ticks, deltas in between. 1 = always full.
    #[serde(default = "default_full_snapshot_interval")]
    pub full_snapshot_interval: u64,
    /// Per-receiver buffer of the broadcast channels.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            tick_rate: default_tick_rate(),
            bots: 0,
            full_snapshot_interval: default_full_snapshot_interval(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_port() -> u16 {
    8443
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_tick_rate() -> u32 {
    30
}
fn default_full_snapshot_interval() -> u64 {
    1
}
fn default_broadcast_capacity() -> usize {
    16
}

/// World border configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BorderConfig {
    #[serde(default = "default_border_size")]
    pub width: f32,
    #[serde(default = "default_border_size")]
    pub height: f32,
}

impl Default for BorderConfig {
    fn default() -> Self {
        Self {
            width: default_border_size(),
            height: default_border_size(),
        }
    }
}

fn default_border_size() -> f32 {
    4000.0
}

/// Player cell configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: f32,
    #[serde(default = "default_min_size")]
    pub min_size: f32,
    #[serde(default = "default_max_size")]
    pub max_size: f32,
    /// Distance per input command at `initial_size`.
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_speed_floor")]
    pub speed_floor: f32,
    /// Buffered inputs per session; the oldest is dropped on overflow.
    #[serde(default = "default_input_queue_limit")]
    pub input_queue_limit: usize,
    #[serde(default = "default_respawn_delay_ms")]
    pub respawn_delay_ms: u64,
    /// Fraction of score lost on respawn.
    #[serde(default = "default_respawn_score_penalty")]
    pub respawn_score_penalty: f32,
    /// Attempts at finding a spawn point clear of other entities.
    #[serde(default = "default_spawn_attempts")]
    pub spawn_attempts: u32,
    #[serde(default = "default_min_split_size")]
    pub min_split_size: f32,
    /// Family members (root included) a player may have.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
    #[serde(default = "default_merge_cooldown_ms")]
    pub merge_cooldown_ms: u64,
    /// Launch distance of a fresh split cell.
    #[serde(default = "default_split_boost")]
    pub split_boost: f32,
    #[serde(default = "default_min_eject_size")]
    pub min_eject_size: f32,
    /// Mass lost per eject.
    #[serde(default = "default_eject_mass")]
    pub eject_mass: f32,
    /// Value of the pellet an eject produces.
    #[serde(default = "default_eject_value")]
    pub eject_value: f32,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            speed: default_speed(),
            speed_floor: default_speed_floor(),
            input_queue_limit: default_input_queue_limit(),
            respawn_delay_ms: default_respawn_delay_ms(),
            respawn_score_penalty: default_respawn_score_penalty(),
            spawn_attempts: default_spawn_attempts(),
            min_split_size: default_min_split_size(),
            max_cells: default_max_cells(),
            merge_cooldown_ms: default_merge_cooldown_ms(),
            split_boost: default_split_boost(),
            min_eject_size: default_min_eject_size(),
            eject_mass: default_eject_mass(),
            eject_value: default_eject_value(),
            max_name_length: default_max_name_length(),
        }
    }
}

fn default_initial_size() -> f32 {
    25.0
}
fn default_min_size() -> f32 {
    20.0
}
fn default_max_size() -> f32 {
    500.0
}
fn default_speed() -> f32 {
    6.0
}
fn default_speed_floor() -> f32 {
    0.25
}
fn default_input_queue_limit() -> usize {
    64
}
fn default_respawn_delay_ms() -> u64 {
    3000
}
fn default_respawn_score_penalty() -> f32 {
    0.25
}
fn default_spawn_attempts() -> u32 {
    20
}
fn default_min_split_size() -> f32 {
    50.0
}
fn default_max_cells() -> usize {
    8
}
fn default_merge_cooldown_ms() -> u64 {
    10_000
}
fn default_split_boost() -> f32 {
    300.0
}
fn default_min_eject_size() -> f32 {
    40.0
}
fn default_eject_mass() -> f32 {
    2.0
}
fn default_eject_value() -> f32 {
    2.0
}
fn default_max_name_length() -> usize {
    24
}

/// Pellet population configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PelletConfig {
    #[serde(default = "default_pellet_target")]
    pub target_count: usize,
    /// Regeneration starts below this fraction of the target.
    #[serde(default = "default_regen_threshold")]
    pub regen_threshold: f32,
    #[serde(default = "default_pellet_max_per_tick")]
    pub max_per_tick: usize,
    #[serde(default = "default_pellet_min_size")]
    pub min_size: f32,
    #[serde(default = "default_pellet_max_size")]
    pub max_size: f32,
    #[serde(default = "default_pellet_value")]
    pub value: f32,
    #[serde(default = "default_pellet_spawn_attempts")]
    pub spawn_attempts: u32,
    /// Extra gap kept between a new pellet and any entity edge.
    #[serde(default = "default_pellet_clearance")]
    pub spawn_clearance: f32,
}

impl Default for PelletConfig {
    fn default() -> Self {
        Self {
            target_count: default_pellet_target(),
            regen_threshold: default_regen_threshold(),
            max_per_tick: default_pellet_max_per_tick(),
            min_size: default_pellet_min_size(),
            max_size: default_pellet_max_size(),
            value: default_pellet_value(),
            spawn_attempts: default_pellet_spawn_attempts(),
            spawn_clearance: default_pellet_clearance(),
        }
    }
}

fn default_pellet_target() -> usize {
    800
}
fn default_regen_threshold() -> f32 {
    0.8
}
fn default_pellet_max_per_tick() -> usize {
    50
}
fn default_pellet_min_size() -> f32 {
    5.0
}
fn default_pellet_max_size() -> f32 {
    8.0
}
fn default_pellet_value() -> f32 {
    1.0
}
fn default_pellet_spawn_attempts() -> u32 {
    10
}
fn default_pellet_clearance() -> f32 {
    10.0
}

/// Collision and growth constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CombatConfig {
    /// Pellet hitbox inflation to offset stale client positions.
    #[serde(default = "default_latency_compensation")]
    pub latency_compensation: f32,
    #[serde(default = "default_size_gain_multiplier")]
    pub size_gain_multiplier: f32,
    #[serde(default = "default_score_multiplier")]
    pub score_multiplier: f32,
    /// Predators smaller than this never eat entities.
    #[serde(default = "default_min_eat_size")]
    pub min_eat_size: f32,
    /// Predator must be at least this many times the prey's size.
    #[serde(default = "default_eat_size_ratio")]
    pub eat_size_ratio: f32,
    /// Prey may be at most this fraction of the predator's size.
    #[serde(default = "default_max_prey_ratio")]
    pub max_prey_ratio: f32,
    /// Centre distance must be below prey size times this.
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f32,
    /// Fraction of the prey's mass the predator gains.
    #[serde(default = "default_mass_transfer")]
    pub mass_transfer: f32,
    #[serde(default = "default_kill_score_multiplier")]
    pub kill_score_multiplier: f32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            latency_compensation: default_latency_compensation(),
            size_gain_multiplier: default_size_gain_multiplier(),
            score_multiplier: default_score_multiplier(),
            min_eat_size: default_min_eat_size(),
            eat_size_ratio: default_eat_size_ratio(),
            max_prey_ratio: default_max_prey_ratio(),
            overlap_ratio: default_overlap_ratio(),
            mass_transfer: default_mass_transfer(),
            kill_score_multiplier: default_kill_score_multiplier(),
        }
    }
}

fn default_latency_compensation() -> f32 {
    1.2
}
fn default_size_gain_multiplier() -> f32 {
    0.4
}
fn default_score_multiplier() -> f32 {
    15.0
}
fn default_min_eat_size() -> f32 {
    30.0
}
fn default_eat_size_ratio() -> f32 {
    1.15
}
fn default_max_prey_ratio() -> f32 {
    0.9
}
fn default_overlap_ratio() -> f32 {
    0.7
}
fn default_mass_transfer() -> f32 {
    0.8
}
fn default_kill_score_multiplier() -> f32 {
    10.0
}

/// Round (game) configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoundConfig {
    /// Round length in seconds; 0 runs a single endless round.
    #[serde(default)]
    pub duration_secs: u64,
    /// Paid to the round winner in the results handed to the stats sink.
    #[serde(default)]
    pub prize_pool: f64,
}
