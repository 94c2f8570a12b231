//! Collision damage resolution.
//!
//! Consumes raw per-tick contact reports from the external physics step and
//! turns them into exactly-once damage and death state changes. A physics
//! engine reports the same ongoing contact on many consecutive ticks; the
//! per-pair cooldown window collapses those into a single resolved
//! collision. Everything downstream (health sync, death events) is
//! replicated like any other state change.

use log::{debug, warn};
use shared::math::{Quat, Vec3};
use shared::protocol::EntityId;
use shared::vehicle::Section;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::game::World;

/// One contact point from the physics manifold, world space.
#[derive(Debug, Clone, Copy)]
pub struct ContactPoint {
    pub point: Vec3,
    pub penetration: f32,
}

/// Raw contact data for one entity pair, as supplied by the physics
/// collaborator once per tick.
#[derive(Debug, Clone)]
pub struct ContactReport {
    pub first: EntityId,
    pub second: EntityId,
    pub contacts: Vec<ContactPoint>,
    /// Pre-collision speed of each side.
    pub speed_first: f32,
    pub speed_second: f32,
}

#[derive(Debug, Clone)]
pub struct CollisionConfig {
    /// At least one side must be moving faster than this for a contact to
    /// count as a collision rather than a resting touch.
    pub min_speed: f32,
    /// Minimum elapsed time between two resolved collisions for the same
    /// entity pair. A duration rather than a tick count, since the tick
    /// rate is configurable.
    pub cooldown: Duration,
    /// Raw damage per meter of averaged penetration depth.
    pub damage_per_meter: f32,
    /// Clamp on the total raw damage of a single hit.
    pub max_hit_damage: f32,
    /// Multiplier applied to the side struck in the more vulnerable
    /// section.
    pub vulnerability_bias: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            min_speed: 5.0,
            cooldown: Duration::from_millis(400),
            damage_per_meter: 250.0,
            max_hit_damage: 100.0,
            vulnerability_bias: 1.25,
        }
    }
}

/// Severity tier of a resolved collision, used downstream to pick a
/// visual/audio effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Scratch,
    Heavy,
    Brutal,
}

/// One side's view of a resolved collision.
#[derive(Debug, Clone)]
pub struct CollisionEvent {
    pub entity: EntityId,
    pub other: EntityId,
    /// Averaged contact point in this entity's local frame.
    pub local_point: Vec3,
    pub penetration: f32,
    pub pre_speed: f32,
    pub damage: f32,
    pub section: Section,
    pub severity: Severity,
}

/// Outcome of resolving one tick's contact reports.
#[derive(Debug, Default)]
pub struct Resolution {
    pub events: Vec<CollisionEvent>,
    /// `(victim, killer)` for every entity whose health reached zero.
    pub deaths: Vec<(EntityId, EntityId)>,
}

/// Deduplicates and resolves contact reports into damage.
pub struct CollisionResolver {
    config: CollisionConfig,
    /// Last-resolved instant per unordered pair. Entries are created lazily
    /// and never reaped; the pair space is bounded by the player count.
    cooldowns: HashMap<(EntityId, EntityId), Instant>,
}

impl CollisionResolver {
    pub fn new(config: CollisionConfig) -> Self {
        CollisionResolver {
            config,
            cooldowns: HashMap::new(),
        }
    }

    /// Resolves one tick's worth of contact reports against the world,
    /// applying damage and death transitions and returning the emitted
    /// events.
    pub fn resolve(
        &mut self,
        reports: &[ContactReport],
        world: &mut World,
        now: Instant,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        for report in reports {
            self.resolve_one(report, world, now, &mut resolution);
        }
        resolution
    }

    fn resolve_one(
        &mut self,
        report: &ContactReport,
        world: &mut World,
        now: Instant,
        out: &mut Resolution,
    ) {
        if report.first == report.second {
            warn!(
                "Discarding contact report naming entity {} on both sides",
                report.first
            );
            return;
        }

        // Race with a concurrent leave or an earlier fatal hit this tick:
        // the report is stale, drop it without effect.
        let (Some(a), Some(b)) = (
            world.session.entity(report.first),
            world.session.entity(report.second),
        ) else {
            return;
        };
        if !a.alive || !b.alive {
            return;
        }
        let (Some(vehicle_a), Some(vehicle_b)) = (a.vehicle.clone(), b.vehicle.clone()) else {
            return;
        };

        // A touch with neither side moving is not a collision.
        if report.speed_first < self.config.min_speed
            && report.speed_second < self.config.min_speed
        {
            return;
        }

        // Average the penetrating contacts into one representative
        // point/depth for the pair; a manifold with no actual penetration
        // is a grazing touch.
        let Some((avg_point, avg_depth)) = average_contacts(&report.contacts) else {
            return;
        };

        let key = pair_key(report.first, report.second);
        if let Some(last) = self.cooldowns.get(&key) {
            if now.duration_since(*last) < self.config.cooldown {
                return;
            }
        }

        let total = (avg_depth * self.config.damage_per_meter).min(self.config.max_hit_damage);

        // Split total damage proportionally to each side's share of the
        // combined closing speed: the faster vehicle inflicts the larger
        // share on the slower one.
        let combined = report.speed_first + report.speed_second;
        let mut damage_a = total * report.speed_second / combined;
        let mut damage_b = total * report.speed_first / combined;

        // Class-pair multiplier: the opponent's class scales what lands.
        damage_a *= vehicle_b.class.damage_multiplier(vehicle_a.class);
        damage_b *= vehicle_a.class.damage_multiplier(vehicle_b.class);

        let local_a = Quat::world_to_local(&vehicle_a.position, &vehicle_a.orientation, &avg_point);
        let local_b = Quat::world_to_local(&vehicle_b.position, &vehicle_b.orientation, &avg_point);
        let section_a = Section::from_local_point(&local_a, vehicle_a.class);
        let section_b = Section::from_local_point(&local_b, vehicle_b.class);

        // Whoever was hit in the more vulnerable section takes extra.
        if section_a.vulnerability() > section_b.vulnerability() {
            damage_a *= self.config.vulnerability_bias;
        } else if section_b.vulnerability() > section_a.vulnerability() {
            damage_b *= self.config.vulnerability_bias;
        }

        let severity = classify_severity(total, combined);

        let health_a = world
            .session
            .apply_damage(report.first, damage_a, section_a);
        let health_b = world
            .session
            .apply_damage(report.second, damage_b, section_b);

        if health_a == Some(0.0) {
            world.session.mark_dead(report.first);
            out.deaths.push((report.first, report.second));
        }
        if health_b == Some(0.0) {
            world.session.mark_dead(report.second);
            out.deaths.push((report.second, report.first));
        }

        // The cooldown stamp moves only once resolution completes, so a
        // discarded report never suppresses a later real collision.
        self.cooldowns.insert(key, now);

        debug!(
            "Collision {}<->{}: total {:.1}, split {:.1}/{:.1}, {:?}",
            report.first, report.second, total, damage_a, damage_b, severity
        );

        out.events.push(CollisionEvent {
            entity: report.first,
            other: report.second,
            local_point: local_a,
            penetration: avg_depth,
            pre_speed: report.speed_first,
            damage: damage_a,
            section: section_a,
            severity,
        });
        out.events.push(CollisionEvent {
            entity: report.second,
            other: report.first,
            local_point: local_b,
            penetration: avg_depth,
            pre_speed: report.speed_second,
            damage: damage_b,
            section: section_b,
            severity,
        });
    }
}

fn pair_key(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn average_contacts(contacts: &[ContactPoint]) -> Option<(Vec3, f32)> {
    let penetrating: Vec<&ContactPoint> =
        contacts.iter().filter(|c| c.penetration > 0.0).collect();
    if penetrating.is_empty() {
        return None;
    }
    let n = penetrating.len() as f32;
    let mut point = Vec3::ZERO;
    let mut depth = 0.0;
    for contact in penetrating {
        point = point.add(&contact.point);
        depth += contact.penetration;
    }
    Some((point.scale(1.0 / n), depth / n))
}

fn classify_severity(total: f32, combined_speed: f32) -> Severity {
    if total >= 60.0 || combined_speed >= 120.0 {
        Severity::Brutal
    } else if total >= 25.0 || combined_speed >= 60.0 {
        Severity::Heavy
    } else {
        Severity::Scratch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::{GameMode, Team};
    use shared::vehicle::VehicleClass;
    use shared::MAX_HEALTH;

    /// Two medium cars facing +z, nose to tail along the x axis so the
    /// midpoint contact lands mid-right on the first and mid-left on the
    /// second (equal vulnerability, no bias).
    fn two_car_world() -> World {
        let mut world = World::new(8, 1, GameMode::FreeForAll, "pit".to_string());
        for (id, x) in [(1u32, -2.0f32), (2u32, 2.0f32)] {
            world.session.join(id, &format!("car{}", id));
            world.session.select_team(id, if id == 1 { Team::Red } else { Team::Blue });
            let mut rng = rand::rngs::mock::StepRng::new(0, 1);
            world.spawn_request(id, VehicleClass::Medium, &mut rng);
            let vehicle = world
                .session
                .entity_mut(id)
                .unwrap()
                .vehicle
                .as_mut()
                .unwrap();
            vehicle.position = Vec3::new(x, 0.0, 0.0);
        }
        world
    }

    fn midpoint_report(speed_first: f32, speed_second: f32, depth: f32) -> ContactReport {
        ContactReport {
            first: 1,
            second: 2,
            contacts: vec![ContactPoint {
                point: Vec3::ZERO,
                penetration: depth,
            }],
            speed_first,
            speed_second,
        }
    }

    fn resolver() -> CollisionResolver {
        CollisionResolver::new(CollisionConfig::default())
    }

    #[test]
    fn test_slower_vehicle_takes_larger_share() {
        let mut world = two_car_world();
        let mut resolver = resolver();

        // Depth 0.4m at 250 damage/m: total 100, under the 100 clamp.
        let report = midpoint_report(60.0, 20.0, 0.4);
        let resolution = resolver.resolve(&[report], &mut world, Instant::now());

        assert_eq!(resolution.events.len(), 2);
        let to_first = resolution.events.iter().find(|e| e.entity == 1).unwrap();
        let to_second = resolution.events.iter().find(|e| e.entity == 2).unwrap();

        assert_approx_eq!(to_first.damage, 25.0, 1e-3);
        assert_approx_eq!(to_second.damage, 75.0, 1e-3);
        assert_approx_eq!(to_first.damage + to_second.damage, 100.0, 1e-3);

        assert_approx_eq!(world.session.entity(1).unwrap().health, 75.0, 1e-3);
        assert_approx_eq!(world.session.entity(2).unwrap().health, 25.0, 1e-3);
    }

    #[test]
    fn test_total_damage_clamped_per_hit() {
        let mut world = two_car_world();
        let mut resolver = resolver();

        let report = midpoint_report(30.0, 30.0, 5.0);
        let resolution = resolver.resolve(&[report], &mut world, Instant::now());
        let total: f32 = resolution.events.iter().map(|e| e.damage).sum();
        assert_approx_eq!(total, 100.0, 1e-3);
    }

    #[test]
    fn test_cooldown_suppresses_ongoing_contact() {
        let mut world = two_car_world();
        let mut resolver = resolver();
        let start = Instant::now();

        // The same ongoing contact reported on three consecutive ticks
        // inside the window resolves exactly once.
        let mut events = 0;
        for tick in 0..3u64 {
            let now = start + Duration::from_millis(tick * 33);
            let resolution =
                resolver.resolve(&[midpoint_report(30.0, 10.0, 0.1)], &mut world, now);
            events += resolution.events.len();
        }
        assert_eq!(events, 2);

        // Spaced past the window, each report resolves.
        let later = start + Duration::from_millis(500);
        let resolution = resolver.resolve(&[midpoint_report(30.0, 10.0, 0.1)], &mut world, later);
        assert_eq!(resolution.events.len(), 2);
    }

    #[test]
    fn test_discarded_report_does_not_refresh_cooldown() {
        let mut world = two_car_world();
        let mut resolver = resolver();
        let start = Instant::now();

        resolver.resolve(&[midpoint_report(30.0, 10.0, 0.1)], &mut world, start);

        // Inside the window: swallowed, stamp untouched.
        let inside = start + Duration::from_millis(200);
        assert!(resolver
            .resolve(&[midpoint_report(30.0, 10.0, 0.1)], &mut world, inside)
            .events
            .is_empty());

        // The window is measured from the original resolution, not the
        // swallowed report.
        let past = start + Duration::from_millis(420);
        assert_eq!(
            resolver
                .resolve(&[midpoint_report(30.0, 10.0, 0.1)], &mut world, past)
                .events
                .len(),
            2
        );
    }

    #[test]
    fn test_slow_touch_and_grazing_contact_ignored() {
        let mut world = two_car_world();
        let mut resolver = resolver();

        // Neither side over the speed threshold.
        let slow = midpoint_report(2.0, 3.0, 0.2);
        assert!(resolver
            .resolve(&[slow], &mut world, Instant::now())
            .events
            .is_empty());

        // Fast, but no contact actually penetrates.
        let grazing = midpoint_report(50.0, 0.0, 0.0);
        assert!(resolver
            .resolve(&[grazing], &mut world, Instant::now())
            .events
            .is_empty());
        assert_eq!(world.session.entity(1).unwrap().health, MAX_HEALTH);
    }

    #[test]
    fn test_self_pair_rejected() {
        let mut world = two_car_world();
        let mut resolver = resolver();
        let mut report = midpoint_report(50.0, 50.0, 0.3);
        report.second = 1;
        assert!(resolver
            .resolve(&[report], &mut world, Instant::now())
            .events
            .is_empty());
    }

    #[test]
    fn test_report_for_departed_entity_discarded() {
        let mut world = two_car_world();
        let mut resolver = resolver();
        world.session.leave(2, "quit");

        let resolution =
            resolver.resolve(&[midpoint_report(50.0, 50.0, 0.3)], &mut world, Instant::now());
        assert!(resolution.events.is_empty());
        assert_eq!(world.session.entity(1).unwrap().health, MAX_HEALTH);
    }

    #[test]
    fn test_fatal_hit_emits_death_with_killer() {
        let mut world = two_car_world();
        let mut resolver = resolver();
        // Soften the victim first.
        world
            .session
            .apply_damage(2, MAX_HEALTH - 10.0, Section::MidLeft);

        let resolution =
            resolver.resolve(&[midpoint_report(60.0, 20.0, 0.4)], &mut world, Instant::now());

        assert_eq!(resolution.deaths, vec![(2, 1)]);
        let victim = world.session.entity(2).unwrap();
        assert!(!victim.alive);
        assert_eq!(victim.health, 0.0);
        assert!(victim.vehicle.is_none());
        assert!(world.session.entity(1).unwrap().alive);
    }

    #[test]
    fn test_heavier_class_inflicts_more() {
        let mut world = World::new(8, 1, GameMode::FreeForAll, "pit".to_string());
        for (id, x, class) in [
            (1u32, -2.0f32, VehicleClass::Heavy),
            (2u32, 2.0f32, VehicleClass::Light),
        ] {
            world.session.join(id, "x");
            world
                .session
                .select_team(id, if id == 1 { Team::Red } else { Team::Blue });
            let mut rng = rand::rngs::mock::StepRng::new(0, 1);
            world.spawn_request(id, class, &mut rng);
            world
                .session
                .entity_mut(id)
                .unwrap()
                .vehicle
                .as_mut()
                .unwrap()
                .position = Vec3::new(x, 0.0, 0.0);
        }

        let mut resolver = resolver();
        // Equal speeds: the pre-multiplier split is even, so any skew comes
        // from the class pairing alone.
        let resolution =
            resolver.resolve(&[midpoint_report(40.0, 40.0, 0.2)], &mut world, Instant::now());
        let to_heavy = resolution.events.iter().find(|e| e.entity == 1).unwrap();
        let to_light = resolution.events.iter().find(|e| e.entity == 2).unwrap();
        assert!(to_light.damage > to_heavy.damage);
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(classify_severity(10.0, 20.0), Severity::Scratch);
        assert_eq!(classify_severity(30.0, 20.0), Severity::Heavy);
        assert_eq!(classify_severity(10.0, 70.0), Severity::Heavy);
        assert_eq!(classify_severity(80.0, 20.0), Severity::Brutal);
        assert_eq!(classify_severity(10.0, 150.0), Severity::Brutal);
    }

    #[test]
    fn test_average_contacts_ignores_non_penetrating() {
        let contacts = vec![
            ContactPoint {
                point: Vec3::new(1.0, 0.0, 0.0),
                penetration: 0.2,
            },
            ContactPoint {
                point: Vec3::new(3.0, 0.0, 0.0),
                penetration: 0.4,
            },
            ContactPoint {
                point: Vec3::new(100.0, 0.0, 0.0),
                penetration: 0.0,
            },
        ];
        let (point, depth) = average_contacts(&contacts).unwrap();
        assert_approx_eq!(point.x, 2.0);
        assert_approx_eq!(depth, 0.3, 1e-5);
    }
}
