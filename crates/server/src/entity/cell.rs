//! Entity type shared by players, bots and split cells.

use glam::Vec2;
use protocol::{WorldBounds, mass_to_size, size_to_mass};

/// Who controls an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Driven by a connected client.
    Player { client_id: u32 },
    /// Driven by the AI step.
    Bot,
    /// Transient cell split off `parent_id`; may merge back after `merge_at_ms`.
    Split { parent_id: u32, merge_at_ms: u64 },
}

/// Why and when an entity died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathInfo {
    pub killer_id: u32,
    pub at_ms: u64,
}

/// Size clamp carried by every entity so no code path can leave the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeLimits {
    pub min: f32,
    pub max: f32,
}

impl SizeLimits {
    /// Clamp `size` into the range. An inverted range resolves to `max`
    /// instead of panicking.
    #[inline]
    pub fn apply(&self, size: f32) -> f32 {
        size.max(self.min).min(self.max)
    }
}

/// Per-round counters reported to the stats collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityStats {
    pub kills: u32,
    pub deaths: u32,
    pub joined_at_ms: u64,
    /// Time spent alive before the current life.
    pub survived_ms: u64,
    pub life_started_ms: u64,
    pub max_size: f32,
}

/// Boost movement data (split launch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boost {
    /// Remaining distance to travel.
    pub distance: f32,
    /// Direction vector (normalized).
    pub direction: Vec2,
}

/// A cell in the arena.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub position: Vec2,
    size: f32,
    mass: f32,
    limits: SizeLimits,
    pub score: u64,
    pub alive: bool,
    pub death: Option<DeathInfo>,
    pub boost: Option<Boost>,
    pub stats: EntityStats,
}

impl Entity {
    /// Create a new entity of the given kind.
    pub fn new(
        id: u32,
        kind: EntityKind,
        position: Vec2,
        size: f32,
        limits: SizeLimits,
        now_ms: u64,
    ) -> Self {
        let size = limits.apply(size);
        Self {
            id,
            kind,
            position,
            size,
            mass: size_to_mass(size),
            limits,
            score: 0,
            alive: true,
            death: None,
            boost: None,
            stats: EntityStats {
                joined_at_ms: now_ms,
                life_started_ms: now_ms,
                max_size: size,
                ..EntityStats::default()
            },
        }
    }

    #[inline]
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Mass is always size² / 100.
    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Set the size (clamped) and update mass.
    #[inline]
    pub fn set_size(&mut self, size: f32) {
        self.size = self.limits.apply(size);
        self.mass = size_to_mass(self.size);
        if self.size > self.stats.max_size {
            self.stats.max_size = self.size;
        }
    }

    /// Set the mass; size follows via sqrt(100 × mass) and is clamped.
    #[inline]
    pub fn set_mass(&mut self, mass: f32) {
        self.set_size(mass_to_size(mass));
    }

    #[inline]
    pub fn is_bot(&self) -> bool {
        matches!(self.kind, EntityKind::Bot)
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self.kind, EntityKind::Split { .. })
    }

    /// Client that owns this entity directly, if any.
    pub fn client_id(&self) -> Option<u32> {
        match self.kind {
            EntityKind::Player { client_id } => Some(client_id),
            _ => None,
        }
    }

    /// Root of the split family: the parent for splits, self otherwise.
    #[inline]
    pub fn family_id(&self) -> u32 {
        match self.kind {
            EntityKind::Split { parent_id, .. } => parent_id,
            _ => self.id,
        }
    }

    #[inline]
    pub fn same_family(&self, other: &Entity) -> bool {
        self.family_id() == other.family_id()
    }

    /// Mark dead. Keeps the entity in the roster for the death transition.
    pub fn kill(&mut self, killer_id: u32, now_ms: u64) {
        if !self.alive {
            return;
        }
        self.alive = false;
        self.boost = None;
        self.death = Some(DeathInfo {
            killer_id,
            at_ms: now_ms,
        });
        self.stats.deaths += 1;
        self.stats.survived_ms += now_ms.saturating_sub(self.stats.life_started_ms);
    }

    /// Bring a dead entity back. Returns false (and changes nothing) if alive.
    pub fn respawn(&mut self, position: Vec2, size: f32, score_penalty: f32, now_ms: u64) -> bool {
        if self.alive {
            return false;
        }
        let keep = (1.0 - score_penalty).clamp(0.0, 1.0);
        self.score = (self.score as f64 * keep as f64).floor() as u64;
        self.position = position;
        self.set_size(size);
        self.alive = true;
        self.death = None;
        self.stats.life_started_ms = now_ms;
        true
    }

    /// Milliseconds alive this round, including the current life.
    pub fn survival_ms(&self, now_ms: u64) -> u64 {
        let current = if self.alive {
            now_ms.saturating_sub(self.stats.life_started_ms)
        } else {
            0
        };
        self.stats.survived_ms + current
    }

    /// Set a launch boost along `direction`.
    #[inline]
    pub fn set_boost(&mut self, distance: f32, direction: Vec2) {
        self.boost = Some(Boost {
            distance,
            direction: direction.normalize_or_zero(),
        });
    }

    /// Advance boost movement by one tick.
    /// Returns true if the cell is still boosting.
    /// Exponential decay: move 1/10 of the remaining distance each tick.
    pub fn update_boost(&mut self, bounds: &WorldBounds) -> bool {
        let Some(boost) = self.boost.as_mut() else {
            return false;
        };
        if boost.distance < 1.0 {
            self.boost = None;
            return false;
        }
        let move_dist = boost.distance / 10.0;
        boost.distance -= move_dist;
        let delta = boost.direction * move_dist;
        self.position = bounds.clamp(self.position + delta, self.size);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: SizeLimits = SizeLimits {
        min: 20.0,
        max: 500.0,
    };

    fn entity(id: u32, kind: EntityKind) -> Entity {
        Entity::new(id, kind, Vec2::ZERO, 25.0, LIMITS, 0)
    }

    #[test]
    fn test_size_is_clamped_and_mass_follows() {
        let mut e = entity(1, EntityKind::Bot);
        e.set_size(10_000.0);
        assert_eq!(e.size(), 500.0);
        assert_eq!(e.mass(), 2500.0);
        e.set_size(1.0);
        assert_eq!(e.size(), 20.0);
        assert_eq!(e.mass(), 4.0);
    }

    #[test]
    fn test_inverted_limits_do_not_panic() {
        let inverted = SizeLimits { min: 80.0, max: 40.0 };
        let mut e = Entity::new(1, EntityKind::Bot, Vec2::ZERO, 60.0, inverted, 0);
        assert_eq!(e.size(), 40.0);
        e.set_size(10.0);
        assert_eq!(e.size(), 40.0);
    }

    #[test]
    fn test_family_ids() {
        let root = entity(1, EntityKind::Player { client_id: 9 });
        let split = entity(
            2,
            EntityKind::Split {
                parent_id: 1,
                merge_at_ms: 0,
            },
        );
        let other = entity(3, EntityKind::Bot);
        assert!(root.same_family(&split));
        assert!(!root.same_family(&other));
        assert_eq!(root.client_id(), Some(9));
    }

    #[test]
    fn test_respawn_is_idempotent_on_alive() {
        let mut e = entity(1, EntityKind::Bot);
        e.score = 100;
        assert!(!e.respawn(Vec2::ONE, 25.0, 0.5, 10));
        assert_eq!(e.score, 100);

        e.kill(2, 100);
        assert!(!e.alive);
        assert_eq!(e.death.unwrap().killer_id, 2);
        assert!(e.respawn(Vec2::ONE, 25.0, 0.5, 200));
        assert_eq!(e.score, 50);
        assert!(e.alive);
        assert!(e.death.is_none());
        assert_eq!(e.position, Vec2::ONE);
    }

    #[test]
    fn test_survival_accumulates_across_lives() {
        let mut e = entity(1, EntityKind::Bot);
        e.kill(2, 1000);
        e.respawn(Vec2::ZERO, 25.0, 0.0, 3000);
        assert_eq!(e.survival_ms(3500), 1500);
    }

    #[test]
    fn test_boost_decays() {
        let bounds = WorldBounds::new(10_000.0, 10_000.0);
        let mut e = entity(1, EntityKind::Bot);
        e.set_boost(100.0, Vec2::X);
        assert!(e.update_boost(&bounds));
        assert!((e.position.x - 10.0).abs() < 1e-4);
        let mut ticks = 0;
        while e.update_boost(&bounds) {
            ticks += 1;
        }
        assert!(ticks > 10);
        assert!(e.boost.is_none());
        assert!(e.position.x < 100.0);
    }
}
