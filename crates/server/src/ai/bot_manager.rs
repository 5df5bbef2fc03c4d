use protocol::packets::InputCommand;
use rand::Rng;

use super::bot_player::Bot;
use crate::config::Config;
use crate::entity::Pellet;
use crate::world::World;

/// Bot manager.
#[derive(Debug, Default)]
pub struct BotManager {
    /// Active bots.
    pub bots: Vec<Bot>,
}

impl BotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start driving `entity_id`.
    pub fn add_bot<R: Rng + ?Sized>(&mut self, entity_id: u32, rng: &mut R) {
        self.bots.push(Bot::new(entity_id, rng));
    }

    /// Remove a bot by entity ID.
    pub fn remove_bot(&mut self, entity_id: u32) {
        self.bots.retain(|b| b.entity_id != entity_id);
    }

    /// Get a bot by entity ID.
    pub fn get_bot(&self, entity_id: u32) -> Option<&Bot> {
        self.bots.iter().find(|b| b.entity_id == entity_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Run every bot once, returning `(entity_id, command)` pairs in bot order.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        world: &World,
        pellets: &[Pellet],
        config: &Config,
        now_ms: u64,
        rng: &mut R,
    ) -> Vec<(u32, InputCommand)> {
        self.bots
            .iter_mut()
            .filter_map(|bot| {
                bot.think(world, pellets, config, now_ms, &mut *rng)
                    .map(|cmd| (bot.entity_id, cmd))
            })
            .collect()
    }
}
