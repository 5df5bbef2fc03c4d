//! Collision detection and resolution.
//!
//! Two passes per tick over state owned by the game loop:
//! - Pellet consumption (one pellet per entity, one eater per pellet)
//! - Entity eating (one kill per predator, prey dies immediately)
//!
//! This is the only place combat outcomes are decided.

use fixedbitset::FixedBitSet;
use glam::Vec2;
use protocol::WorldBounds;

use crate::config::CombatConfig;
use crate::entity::{Entity, Pellet};
use crate::spatial::{Bounds, PointGrid};

const GRID_SIZE: usize = 32;

/// An entity consumed another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill {
    /// Cell that did the eating.
    pub predator_id: u32,
    /// Family root of the predator; the kill is credited here.
    pub killer_id: u32,
    pub prey_id: u32,
}

/// Everything one resolve pass changed.
#[derive(Debug, Default)]
pub struct CollisionReport {
    /// `(entity_id, pellet_id)` in the order they were eaten.
    pub pellets_eaten: Vec<(u32, u32)>,
    pub kills: Vec<Kill>,
    /// Bit `i` set when `pellets[i]` was eaten.
    pub consumed: FixedBitSet,
}

impl CollisionReport {
    pub fn is_empty(&self) -> bool {
        self.pellets_eaten.is_empty() && self.kills.is_empty()
    }
}

/// Whether an entity at `position` with `size` touches `pellet`.
#[inline]
pub fn touches_pellet(position: Vec2, size: f32, pellet: &Pellet, combat: &CombatConfig) -> bool {
    let reach = (size + pellet.size) * combat.latency_compensation;
    position.distance_squared(pellet.position) < reach * reach
}

/// Whether `predator` may eat `prey` this tick.
///
/// Both must be alive and from different split families; the predator must
/// be big enough to eat at all, clear both size ratios and overlap the prey
/// by more than contact.
pub fn can_eat(predator: &Entity, prey: &Entity, combat: &CombatConfig) -> bool {
    if predator.id == prey.id || !predator.alive || !prey.alive {
        return false;
    }
    if predator.same_family(prey) {
        return false;
    }
    if predator.size() < combat.min_eat_size {
        return false;
    }
    if predator.size() < prey.size() * combat.eat_size_ratio {
        return false;
    }
    if prey.size() > predator.size() * combat.max_prey_ratio {
        return false;
    }
    let d = predator.position.distance(prey.position);
    d < predator.size() + prey.size() && d < prey.size() * combat.overlap_ratio
}

/// Stateless apart from a reusable pellet grid.
#[derive(Debug)]
pub struct CollisionEngine {
    grid: PointGrid,
}

impl CollisionEngine {
    pub fn new(bounds: &WorldBounds) -> Self {
        Self {
            grid: PointGrid::new(bounds, GRID_SIZE),
        }
    }

    /// Resolve pellet and entity collisions, mutating `entities` in place.
    ///
    /// Consumed pellets are only marked; the caller removes them.
    pub fn resolve(
        &mut self,
        entities: &mut [Entity],
        pellets: &[Pellet],
        combat: &CombatConfig,
        now_ms: u64,
    ) -> CollisionReport {
        let mut report = CollisionReport {
            consumed: FixedBitSet::with_capacity(pellets.len()),
            ..CollisionReport::default()
        };
        self.resolve_pellets(entities, pellets, combat, &mut report);
        resolve_entities(entities, combat, now_ms, &mut report);
        report
    }

    fn resolve_pellets(
        &mut self,
        entities: &mut [Entity],
        pellets: &[Pellet],
        combat: &CombatConfig,
        report: &mut CollisionReport,
    ) {
        if pellets.is_empty() {
            return;
        }
        self.grid.rebuild(pellets.iter().map(|p| p.position));
        let max_pellet = pellets.iter().map(|p| p.size).fold(0.0f32, f32::max);

        for entity in entities.iter_mut().filter(|e| e.alive) {
            let reach = (entity.size() + max_pellet) * combat.latency_compensation;
            let candidates = self.grid.query(&Bounds::around(entity.position, reach));

            // Candidates are ascending, so the lowest index wins.
            let hit = candidates.into_iter().map(|i| i as usize).find(|&i| {
                !report.consumed.contains(i)
                    && touches_pellet(entity.position, entity.size(), &pellets[i], combat)
            });
            let Some(index) = hit else {
                continue;
            };

            let pellet = &pellets[index];
            report.consumed.insert(index);
            entity.set_size(entity.size() + pellet.value * combat.size_gain_multiplier);
            entity.score += (pellet.value * combat.score_multiplier).floor().max(0.0) as u64;
            report.pellets_eaten.push((entity.id, pellet.id));
        }
    }
}

fn resolve_entities(
    entities: &mut [Entity],
    combat: &CombatConfig,
    now_ms: u64,
    report: &mut CollisionReport,
) {
    for pred in 0..entities.len() {
        for prey in 0..entities.len() {
            if pred == prey || !can_eat(&entities[pred], &entities[prey], combat) {
                continue;
            }

            let predator_id = entities[pred].id;
            let killer_id = entities[pred].family_id();
            let prey_size = entities[prey].size();
            let prey_mass = entities[prey].mass();
            entities[prey].kill(predator_id, now_ms);

            let predator = &mut entities[pred];
            predator.set_mass(predator.mass() + prey_mass * combat.mass_transfer);
            predator.score += (prey_size * combat.kill_score_multiplier).floor() as u64;

            // Split cells come and go; the root keeps the tally.
            if let Some(root) = entities.iter_mut().find(|e| e.id == killer_id) {
                root.stats.kills += 1;
            }

            report.kills.push(Kill {
                predator_id,
                killer_id,
                prey_id: entities[prey].id,
            });
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, SizeLimits};
    use protocol::Color;

    const LIMITS: SizeLimits = SizeLimits {
        min: 20.0,
        max: 500.0,
    };

    fn entity(id: u32, kind: EntityKind, x: f32, y: f32, size: f32) -> Entity {
        Entity::new(id, kind, Vec2::new(x, y), size, LIMITS, 0)
    }

    fn bot(id: u32, x: f32, y: f32, size: f32) -> Entity {
        entity(id, EntityKind::Bot, x, y, size)
    }

    fn pellet(id: u32, x: f32, y: f32) -> Pellet {
        Pellet::new(id, Vec2::new(x, y), 5.0, Color::new(255, 0, 0), 1.0)
    }

    fn engine() -> CollisionEngine {
        CollisionEngine::new(&WorldBounds::new(4000.0, 4000.0))
    }

    #[test]
    fn test_pellet_grows_entity() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 100.0, 100.0, 25.0)];
        let pellets = vec![pellet(7, 101.0, 100.0)];

        let report = engine().resolve(&mut entities, &pellets, &combat, 0);

        assert!((entities[0].size() - 25.4).abs() < 1e-4);
        assert_eq!(entities[0].score, 15);
        assert!((entities[0].mass() - 25.4 * 25.4 / 100.0).abs() < 1e-3);
        assert_eq!(report.pellets_eaten, vec![(1, 7)]);
        assert!(report.consumed.contains(0));
    }

    #[test]
    fn test_one_pellet_per_entity_lowest_index_first() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 25.0)];
        let pellets = vec![pellet(10, 3.0, 0.0), pellet(11, 1.0, 0.0), pellet(12, 0.0, 2.0)];

        let report = engine().resolve(&mut entities, &pellets, &combat, 0);

        assert_eq!(report.pellets_eaten, vec![(1, 10)]);
        assert_eq!(report.consumed.count_ones(..), 1);
    }

    #[test]
    fn test_pellet_hitbox_is_inflated() {
        let combat = CombatConfig::default();
        // Strict reach is 30, inflated reach is 36.
        let mut entities = vec![bot(1, 0.0, 0.0, 25.0)];
        let pellets = vec![pellet(1, 33.0, 0.0)];
        let report = engine().resolve(&mut entities, &pellets, &combat, 0);
        assert_eq!(report.pellets_eaten.len(), 1);

        let mut entities = vec![bot(1, 0.0, 0.0, 25.0)];
        let pellets = vec![pellet(1, 37.0, 0.0)];
        let report = engine().resolve(&mut entities, &pellets, &combat, 0);
        assert!(report.pellets_eaten.is_empty());
    }

    #[test]
    fn test_no_pellet_eaten_twice() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 25.0), bot(2, 2.0, 0.0, 25.0)];
        let pellets = vec![pellet(1, 1.0, 0.0)];

        let report = engine().resolve(&mut entities, &pellets, &combat, 0);

        assert_eq!(report.pellets_eaten, vec![(1, 1)]);
        assert_eq!(entities[0].score, 15);
        assert_eq!(entities[1].score, 0);
    }

    #[test]
    fn test_dead_entities_do_not_eat_pellets() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 25.0)];
        entities[0].kill(9, 0);
        let pellets = vec![pellet(1, 1.0, 0.0)];
        let report = engine().resolve(&mut entities, &pellets, &combat, 0);
        assert!(report.pellets_eaten.is_empty());
    }

    #[test]
    fn test_predator_eats_overlapping_prey() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 50.0), bot(2, 5.0, 0.0, 40.0)];

        let report = engine().resolve(&mut entities, &[], &combat, 1234);

        assert!(!entities[1].alive);
        let death = entities[1].death.unwrap();
        assert_eq!(death.killer_id, 1);
        assert_eq!(death.at_ms, 1234);
        assert!(entities[0].size() > 50.0);
        // 25 + 0.8 × 16 = 37.8 mass.
        assert!((entities[0].mass() - 37.8).abs() < 1e-3);
        assert_eq!(entities[0].score, 400);
        assert_eq!(entities[0].stats.kills, 1);
        assert_eq!(
            report.kills,
            vec![Kill {
                predator_id: 1,
                killer_id: 1,
                prey_id: 2
            }]
        );
    }

    #[test]
    fn test_near_equal_sizes_do_not_eat() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 50.0), bot(2, 1.0, 0.0, 45.0)];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert!(report.kills.is_empty());
        assert!(entities.iter().all(|e| e.alive));
    }

    #[test]
    fn test_touching_is_not_eating() {
        let combat = CombatConfig::default();
        // Within combined radius (90) but outside the overlap threshold (28).
        let mut entities = vec![bot(1, 0.0, 0.0, 50.0), bot(2, 40.0, 0.0, 40.0)];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert!(report.kills.is_empty());
    }

    #[test]
    fn test_small_predators_never_eat() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 28.0), bot(2, 1.0, 0.0, 20.0)];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert!(report.kills.is_empty());
    }

    #[test]
    fn test_split_family_is_immune() {
        let combat = CombatConfig::default();
        let mut entities = vec![
            entity(1, EntityKind::Player { client_id: 1 }, 0.0, 0.0, 100.0),
            entity(
                2,
                EntityKind::Split {
                    parent_id: 1,
                    merge_at_ms: 0,
                },
                1.0,
                0.0,
                40.0,
            ),
            entity(
                3,
                EntityKind::Split {
                    parent_id: 1,
                    merge_at_ms: 0,
                },
                2.0,
                0.0,
                25.0,
            ),
        ];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert!(report.kills.is_empty());
        assert!(entities.iter().all(|e| e.alive));
    }

    #[test]
    fn test_prey_is_eaten_at_most_once() {
        let combat = CombatConfig::default();
        let mut entities = vec![
            bot(1, 0.0, 0.0, 100.0),
            bot(2, 0.0, 1.0, 100.0),
            bot(3, 1.0, 0.0, 40.0),
        ];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert_eq!(
            report.kills,
            vec![Kill {
                predator_id: 1,
                killer_id: 1,
                prey_id: 3
            }]
        );
        assert_eq!(entities[1].score, 0);
    }

    #[test]
    fn test_one_kill_per_predator() {
        let combat = CombatConfig::default();
        let mut entities = vec![
            bot(1, 0.0, 0.0, 200.0),
            bot(2, 1.0, 0.0, 40.0),
            bot(3, -1.0, 0.0, 40.0),
        ];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert_eq!(report.kills.len(), 1);
        assert!(!entities[1].alive);
        assert!(entities[2].alive);
    }

    #[test]
    fn test_split_kill_is_credited_to_root() {
        let combat = CombatConfig::default();
        let mut entities = vec![
            entity(1, EntityKind::Player { client_id: 1 }, 500.0, 0.0, 100.0),
            entity(
                2,
                EntityKind::Split {
                    parent_id: 1,
                    merge_at_ms: 0,
                },
                0.0,
                0.0,
                100.0,
            ),
            bot(3, 1.0, 0.0, 40.0),
        ];
        let report = engine().resolve(&mut entities, &[], &combat, 0);
        assert_eq!(
            report.kills,
            vec![Kill {
                predator_id: 2,
                killer_id: 1,
                prey_id: 3
            }]
        );
        assert_eq!(entities[0].stats.kills, 1);
        assert_eq!(entities[1].stats.kills, 0);
        // Mass and score stay with the split until it merges.
        assert_eq!(entities[1].score, 400);
        assert_eq!(entities[0].score, 0);
    }

    #[test]
    fn test_sizes_stay_in_bounds() {
        let combat = CombatConfig::default();
        let mut entities = vec![bot(1, 0.0, 0.0, 499.0), bot(2, 1.0, 0.0, 400.0)];
        let pellets: Vec<Pellet> = (0..5).map(|i| pellet(i, 0.0, i as f32)).collect();
        engine().resolve(&mut entities, &pellets, &combat, 0);
        for e in &entities {
            assert!(e.size() >= LIMITS.min && e.size() <= LIMITS.max);
        }
        assert_eq!(entities[0].size(), 500.0);
    }
}
