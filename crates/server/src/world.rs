//! World state management.
//!
//! Holds the entity roster. Entities are kept in creation order so every
//! pass over the roster sees them in the same, stable order.

use glam::Vec2;
use protocol::WorldBounds;
use rand::Rng;

use crate::entity::{Entity, EntityKind, SizeLimits};
use crate::pellets::random_position;

/// The game world containing all entities.
#[derive(Debug)]
pub struct World {
    /// Next entity ID to assign.
    next_entity_id: u32,
    entities: Vec<Entity>,
    pub bounds: WorldBounds,
    pub limits: SizeLimits,
}

impl World {
    pub fn new(bounds: WorldBounds, limits: SizeLimits) -> Self {
        Self {
            next_entity_id: 1,
            entities: Vec::with_capacity(256),
            bounds,
            limits,
        }
    }

    /// Get the next entity ID. IDs only grow, so the roster stays sorted.
    fn next_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1).max(1);
        id
    }

    /// Create an entity and append it to the roster.
    pub fn spawn(&mut self, kind: EntityKind, position: Vec2, size: f32, now_ms: u64) -> u32 {
        let id = self.next_id();
        let position = self.bounds.clamp(position, size);
        self.entities
            .push(Entity::new(id, kind, position, size, self.limits, now_ms));
        id
    }

    #[inline]
    fn index_of(&self, id: u32) -> Option<usize> {
        self.entities.binary_search_by_key(&id, |e| e.id).ok()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Entity> {
        self.index_of(id).map(|i| &self.entities[i])
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Entity> {
        self.index_of(id).map(move |i| &mut self.entities[i])
    }

    /// Remove one entity, keeping the order of the rest.
    pub fn remove(&mut self, id: u32) -> Option<Entity> {
        self.index_of(id).map(|i| self.entities.remove(i))
    }

    /// Remove every split cell whose root is `root_id`. Returns their ids.
    pub fn remove_splits_of(&mut self, root_id: u32) -> Vec<u32> {
        let mut removed = Vec::new();
        self.entities.retain(|e| {
            let drop = e.is_split() && e.family_id() == root_id;
            if drop {
                removed.push(e.id);
            }
            !drop
        });
        removed
    }

    /// Drop split cells that died this tick. Returns their ids.
    pub fn remove_dead_splits(&mut self) -> Vec<u32> {
        let mut removed = Vec::new();
        self.entities.retain(|e| {
            let drop = e.is_split() && !e.alive;
            if drop {
                removed.push(e.id);
            }
            !drop
        });
        removed
    }

    /// Number of alive entities in `root_id`'s family, root included.
    pub fn family_size(&self, root_id: u32) -> usize {
        self.entities
            .iter()
            .filter(|e| e.alive && e.family_id() == root_id)
            .count()
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Pick a spawn point for a cell of `size` that overlaps no alive entity.
    ///
    /// Gives up after `attempts` and returns the last candidate.
    pub fn safe_spawn_position<R: Rng + ?Sized>(&self, size: f32, attempts: u32, rng: &mut R) -> Vec2 {
        let inner = WorldBounds {
            min: self.bounds.min + Vec2::splat(size),
            max: self.bounds.max - Vec2::splat(size),
        };
        let area = if inner.width() > 0.0 && inner.height() > 0.0 {
            inner
        } else {
            self.bounds
        };

        let mut candidate = random_position(&area, rng);
        for _ in 0..attempts.max(1) {
            let clear = self.entities.iter().filter(|e| e.alive).all(|e| {
                let r = e.size() + size;
                e.position.distance_squared(candidate) >= r * r
            });
            if clear {
                return candidate;
            }
            candidate = random_position(&area, rng);
        }
        candidate
    }
}
