use glam::Vec2;
use protocol::packets::{Actions, InputCommand};
use rand::Rng;
use tracing::trace;

use crate::config::Config;
use crate::entity::{Entity, Pellet};
use crate::world::World;

/// Bot names to use.
const BOT_NAMES: &[&str] = &[
    "Bot", "Hunter", "Hungry", "Nomnom", "Blob", "Cell", "Eater", "Seeker",
    "Roamer", "Wanderer", "Ghost", "Shadow", "Swift", "Tiny", "Big", "Mega",
];

/// Size margin a bot keeps before treating another cell as prey or threat.
const CAUTION_RATIO: f32 = 1.3;
const SEARCH_RADIUS: f32 = 1000.0;
const WANDER_DISTANCE: f32 = 400.0;

/// A bot player controlled by AI.
#[derive(Debug)]
pub struct Bot {
    /// Entity this bot drives.
    pub entity_id: u32,
    pub name: String,
    /// Current target position.
    pub target: Vec2,
    /// Ticks until next decision.
    pub decision_cooldown: u32,
    /// Cooldown for splitting (ticks).
    pub split_cooldown: u32,
    /// Sequence of the last command produced.
    sequence: u32,
}

impl Bot {
    pub fn new<R: Rng + ?Sized>(entity_id: u32, rng: &mut R) -> Self {
        let name_idx = rng.random_range(0..BOT_NAMES.len());
        Self {
            entity_id,
            name: format!("{}{}", BOT_NAMES[name_idx], entity_id % 100),
            target: Vec2::ZERO,
            decision_cooldown: 0,
            split_cooldown: 0,
            sequence: 0,
        }
    }

    /// Decide where to go this tick. `None` when the bot's entity is gone or dead.
    ///
    /// Every nearby cell pulls or pushes the bot: pellets and smaller cells
    /// attract, larger cells repel, each weighted by inverse distance.
    pub fn think<R: Rng + ?Sized>(
        &mut self,
        world: &World,
        pellets: &[Pellet],
        config: &Config,
        now_ms: u64,
        rng: &mut R,
    ) -> Option<InputCommand> {
        self.split_cooldown = self.split_cooldown.saturating_sub(1);

        let me = world.get(self.entity_id).filter(|e| e.alive)?;
        let my_pos = me.position;
        let my_size = me.size();
        let mut actions = Actions::NONE;

        if self.decision_cooldown > 0 {
            self.decision_cooldown -= 1;
        } else {
            self.decision_cooldown = 2;
            let (result, prey) = self.weigh(me, world, pellets, config);

            if let Some(prey_pos) = prey {
                trace!("Bot {} splitting toward {:?}", self.entity_id, prey_pos);
                self.target = prey_pos;
                self.split_cooldown = 15;
                actions.split = true;
            } else if let Some(dir) = result.try_normalize() {
                self.target = my_pos + dir * SEARCH_RADIUS;
            } else {
                let angle = rng.random_range(0.0..std::f32::consts::TAU);
                self.target = my_pos + Vec2::new(angle.cos(), angle.sin()) * WANDER_DISTANCE;
            }
            self.target = world.bounds.clamp(self.target, 0.0);
        }

        if my_size <= 0.0 {
            return None;
        }
        self.sequence = self.sequence.wrapping_add(1);
        Some(InputCommand {
            sequence: self.sequence,
            timestamp: now_ms,
            target: self.target,
            actions,
        })
    }

    /// Sum of influences around `me`, plus a split target if one is in reach.
    fn weigh(
        &self,
        me: &Entity,
        world: &World,
        pellets: &[Pellet],
        config: &Config,
    ) -> (Vec2, Option<Vec2>) {
        let my_pos = me.position;
        let my_size = me.size();
        let reach_sq = SEARCH_RADIUS * SEARCH_RADIUS;

        let nearby: Vec<&Entity> = world
            .entities()
            .iter()
            .filter(|e| e.alive && !e.same_family(me))
            .filter(|e| e.position.distance_squared(my_pos) < reach_sq)
            .collect();
        let view_nodes = (nearby.len().max(1) as f32).ln().max(1.0);

        let can_split = self.split_cooldown == 0
            && my_size >= config.player.min_split_size
            && world.family_size(me.family_id()) < config.player.max_cells;
        // A split cell carries half the mass.
        let split_size = my_size / std::f32::consts::SQRT_2;

        let mut result = Vec2::ZERO;
        let mut prey: Option<(f32, Vec2)> = None;

        for other in nearby {
            let check_size = other.size();
            let influence = if my_size > check_size * CAUTION_RATIO {
                check_size / view_nodes
            } else if check_size > my_size * CAUTION_RATIO {
                -(check_size / my_size).ln()
            } else {
                -check_size / my_size
            };

            let displacement = other.position - my_pos;
            let mut dist = displacement.length();
            if influence < 0.0 {
                dist -= my_size + check_size;
            }
            let dist = dist.max(1.0);
            result += displacement.normalize_or_zero() * (influence / dist);

            if can_split
                && split_size > check_size * CAUTION_RATIO
                && dist <= config.player.split_boost
                && prey.is_none_or(|(size, _)| check_size > size)
            {
                prey = Some((check_size, other.position));
            }
        }

        for pellet in pellets {
            let displacement = pellet.position - my_pos;
            let dist_sq = displacement.length_squared();
            if dist_sq >= reach_sq {
                continue;
            }
            let dist = dist_sq.sqrt().max(1.0);
            result += displacement.normalize_or_zero() * (pellet.value / dist);
        }

        (result, prey.map(|(_, pos)| pos))
    }
}
