//! Pellet population and regeneration.

use fixedbitset::FixedBitSet;
use glam::Vec2;
use protocol::{Color, WorldBounds};
use rand::Rng;
use tracing::debug;

use crate::config::PelletConfig;
use crate::entity::{Entity, Pellet};

/// Generate a random pellet color.
#[inline]
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Color {
    Color::new(
        rng.random_range(50..=255),
        rng.random_range(50..=255),
        rng.random_range(50..=255),
    )
}

/// Uniform random point inside `bounds`.
#[inline]
pub fn random_position<R: Rng + ?Sized>(bounds: &WorldBounds, rng: &mut R) -> Vec2 {
    if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
        return (bounds.min + bounds.max) / 2.0;
    }
    Vec2::new(
        rng.random_range(bounds.min.x..bounds.max.x),
        rng.random_range(bounds.min.y..bounds.max.y),
    )
}

/// Owns the pellet set and keeps it near the target population.
#[derive(Debug)]
pub struct PelletManager {
    config: PelletConfig,
    bounds: WorldBounds,
    pellets: Vec<Pellet>,
    next_id: u32,
}

impl PelletManager {
    pub fn new(config: PelletConfig, bounds: WorldBounds) -> Self {
        Self {
            pellets: Vec::with_capacity(config.target_count),
            config,
            bounds,
            next_id: 1,
        }
    }

    #[inline]
    pub fn pellets(&self) -> &[Pellet] {
        &self.pellets
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pellets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pellets.is_empty()
    }

    /// Count below which regeneration kicks in.
    #[inline]
    pub fn threshold(&self) -> usize {
        (self.config.target_count as f32 * self.config.regen_threshold).ceil() as usize
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Scatter pellets uniformly until the target count is reached.
    pub fn populate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        while self.pellets.len() < self.config.target_count {
            let position = random_position(&self.bounds, rng);
            self.spawn_at(position, rng);
        }
        debug!("Populated {} pellets", self.pellets.len());
    }

    /// Top up the population if it fell below the threshold.
    ///
    /// Adds at most `max_per_tick` pellets per call. Returns how many were added.
    pub fn regenerate<R: Rng + ?Sized>(&mut self, entities: &[Entity], rng: &mut R) -> usize {
        let count = self.pellets.len();
        if count >= self.threshold() {
            return 0;
        }
        let to_add = self
            .config
            .target_count
            .saturating_sub(count)
            .min(self.config.max_per_tick);
        for _ in 0..to_add {
            let position = self.spawn_position(entities, rng);
            self.spawn_at(position, rng);
        }
        debug!("Regenerated {} pellets ({} -> {})", to_add, count, self.pellets.len());
        to_add
    }

    /// Find a spot not inside any alive entity.
    ///
    /// Falls back to an unchecked random position after `spawn_attempts` tries.
    pub fn spawn_position<R: Rng + ?Sized>(&self, entities: &[Entity], rng: &mut R) -> Vec2 {
        let clearance = self.config.spawn_clearance;
        for _ in 0..self.config.spawn_attempts {
            let candidate = random_position(&self.bounds, rng);
            let blocked = entities.iter().filter(|e| e.alive).any(|e| {
                let r = e.size() + clearance;
                e.position.distance_squared(candidate) < r * r
            });
            if !blocked {
                return candidate;
            }
        }
        random_position(&self.bounds, rng)
    }

    fn spawn_at<R: Rng + ?Sized>(&mut self, position: Vec2, rng: &mut R) {
        let size = if self.config.max_size > self.config.min_size {
            rng.random_range(self.config.min_size..self.config.max_size)
        } else {
            self.config.min_size
        };
        let id = self.next_id();
        let color = random_color(rng);
        self.pellets
            .push(Pellet::new(id, position, size, color, self.config.value));
    }

    /// Add an externally produced pellet (ejected mass). Returns its id.
    pub fn insert(&mut self, position: Vec2, size: f32, color: Color, value: f32) -> u32 {
        let id = self.next_id();
        let position = self.bounds.clamp(position, 0.0);
        self.pellets
            .push(Pellet::new(id, position, size, color, value));
        id
    }

    /// Drop every pellet whose index is set in `consumed`, preserving order.
    pub fn remove_consumed(&mut self, consumed: &FixedBitSet) -> usize {
        if consumed.count_ones(..) == 0 {
            return 0;
        }
        let before = self.pellets.len();
        let mut index = 0;
        self.pellets.retain(|_| {
            let keep = !consumed.contains(index);
            index += 1;
            keep
        });
        before - self.pellets.len()
    }
}
