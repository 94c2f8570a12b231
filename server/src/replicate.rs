//! Per-tick state replication.
//!
//! Snapshots go out every tick for every entity with a live vehicle over
//! the unreliable-sequenced class; a dropped snapshot is simply superseded
//! by the next one. Health is edge-triggered: a reliable damage update is
//! emitted only when an entity's health differs from the last value this
//! replicator broadcast for it, which bounds bandwidth to actual changes.

use shared::protocol::{EntityId, VehicleSnapshot};
use shared::vehicle::SECTION_COUNT;
use shared::MAX_HEALTH;
use std::collections::HashMap;

use crate::game::World;

/// Reliable, edge-triggered health update with per-section detail.
#[derive(Debug, Clone)]
pub struct DamageUpdate {
    pub entity_id: EntityId,
    pub health: f32,
    pub sections: [f32; SECTION_COUNT],
}

#[derive(Debug, Default)]
pub struct Replicator {
    /// Last health value broadcast per entity. Absent means "never sent",
    /// which is equivalent to full health since entities join at full.
    last_health: HashMap<EntityId, f32>,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds this tick's outbound state: one snapshot per live vehicle
    /// (stamped with the current server tick) and one damage update per
    /// entity whose health changed since the last broadcast.
    pub fn tick_outputs(&mut self, world: &World) -> (Vec<VehicleSnapshot>, Vec<DamageUpdate>) {
        let mut snapshots = Vec::new();
        let mut updates = Vec::new();

        for player in world.session.entities() {
            let health_changed = self.health_changed(player.id, player.health);
            if health_changed {
                self.last_health.insert(player.id, player.health);
                updates.push(DamageUpdate {
                    entity_id: player.id,
                    health: player.health,
                    sections: player.section_damage,
                });
            }

            if let Some(vehicle) = player.vehicle.as_ref().filter(|_| player.alive) {
                snapshots.push(VehicleSnapshot {
                    entity_id: player.id,
                    position: vehicle.position,
                    orientation: vehicle.orientation,
                    linear_vel: vehicle.linear_vel,
                    angular_vel: vehicle.angular_vel,
                    steer_angle: vehicle.steer_angle,
                    stamp: world.tick,
                    health: health_changed.then_some(player.health),
                });
            }
        }

        (snapshots, updates)
    }

    fn health_changed(&self, id: EntityId, health: f32) -> bool {
        let last = self.last_health.get(&id).copied().unwrap_or(MAX_HEALTH);
        health != last
    }

    /// Drops tracking state for a departed entity so a reused synthetic id
    /// cannot inherit a stale baseline.
    pub fn forget(&mut self, id: EntityId) {
        self.last_health.remove(&id);
    }
}
