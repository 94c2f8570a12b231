//! Authoritative world state: the session table plus match-level state
//! (mode, arena, clock, scores, VIP). The vehicle dynamics model is an
//! external collaborator; this module only stores its outputs and the
//! control inputs it consumes.

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::math::Vec3;
use shared::protocol::{EntityId, GameMode, InputSample};
use shared::vehicle::VehicleClass;

use crate::session::{SessionManager, SessionPhase, SpawnOutcome, Vehicle};

use std::time::Instant;

pub struct World {
    pub session: SessionManager,
    pub mode: GameMode,
    pub arena: String,
    /// Server tick counter; also the generation stamp of every snapshot
    /// built this tick.
    pub tick: u64,
    match_started: bool,
    min_players: usize,
    match_start: Option<Instant>,
    vip: Option<EntityId>,
    spawn_points: Vec<Vec3>,
}

/// What happened when a spawn request was processed, including any match
/// start it triggered.
pub struct SpawnResult {
    pub outcome: SpawnOutcome,
    pub class: VehicleClass,
    /// Entities promoted out of the waiting room if this spawn started the
    /// match, in id order.
    pub promoted: Vec<EntityId>,
    /// VIP declared at match start, if the mode has one.
    pub vip: Option<EntityId>,
}

impl World {
    pub fn new(max_players: usize, min_players: usize, mode: GameMode, arena: String) -> Self {
        World {
            session: SessionManager::new(max_players),
            mode,
            arena,
            tick: 0,
            match_started: false,
            min_players,
            match_start: None,
            vip: None,
            spawn_points: default_spawn_ring(),
        }
    }

    pub fn match_started(&self) -> bool {
        self.match_started
    }

    pub fn vip(&self) -> Option<EntityId> {
        self.vip
    }

    /// Milliseconds since match start, for TimeSync events.
    pub fn elapsed_ms(&self) -> u64 {
        self.match_start
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Processes a spawn request, picking a spawn point and starting the
    /// match if the minimum player count is now reached.
    pub fn spawn_request<R: Rng>(
        &mut self,
        conn_id: EntityId,
        class: VehicleClass,
        rng: &mut R,
    ) -> SpawnResult {
        let position = self
            .spawn_points
            .choose(rng)
            .copied()
            .unwrap_or(Vec3::ZERO);
        let outcome = self
            .session
            .spawn(conn_id, Vehicle::at(class, position), self.match_started);

        let mut promoted = Vec::new();
        let mut vip = None;
        if !self.match_started && self.waiting_count() >= self.min_players {
            self.match_started = true;
            self.match_start = Some(Instant::now());
            promoted = self.session.promote_queued();
            if self.mode == GameMode::Vip {
                vip = promoted.first().copied();
                self.vip = vip;
            }
            info!(
                "Match started in {:?} mode with {} players",
                self.mode,
                promoted.len()
            );
        }

        SpawnResult {
            outcome,
            class,
            promoted,
            vip,
        }
    }

    fn waiting_count(&self) -> usize {
        self.session
            .entities()
            .filter(|p| p.phase == SessionPhase::WaitForGameStart)
            .count()
    }

    /// Stores the latest control input for an entity. The dynamics
    /// collaborator reads it from the entity when stepping.
    pub fn apply_input(&mut self, conn_id: EntityId, sample: InputSample) {
        if let Some(player) = self.session.entity_mut(conn_id) {
            player.last_input = sample;
        }
    }

    /// Ingests one entity's motion state from the external physics step.
    #[allow(clippy::too_many_arguments)]
    pub fn set_vehicle_state(
        &mut self,
        conn_id: EntityId,
        position: Vec3,
        orientation: shared::math::Quat,
        linear_vel: Vec3,
        angular_vel: Vec3,
        steer_angle: f32,
        speed: f32,
    ) {
        if let Some(vehicle) = self
            .session
            .entity_mut(conn_id)
            .and_then(|p| p.vehicle.as_mut())
        {
            vehicle.position = position;
            vehicle.orientation = orientation;
            vehicle.linear_vel = linear_vel;
            vehicle.angular_vel = angular_vel;
            vehicle.steer_angle = steer_angle;
            vehicle.speed = speed;
        }
    }

    /// Credits a kill to the surviving side of a fatal collision.
    pub fn record_kill(&mut self, killer: EntityId) {
        if let Some(player) = self.session.entity_mut(killer) {
            player.round_score += 1;
        }
    }

    /// Folds round scores into game scores at round end.
    pub fn end_round(&mut self) {
        for player in self.session.entities_mut() {
            player.game_score += player.round_score;
            player.round_score = 0;
        }
    }

    pub fn score_table(&self) -> Vec<(EntityId, u32, u32)> {
        let mut scores: Vec<(EntityId, u32, u32)> = self
            .session
            .entities()
            .map(|p| (p.id, p.round_score, p.game_score))
            .collect();
        scores.sort_by_key(|(id, _, _)| *id);
        scores
    }
}

fn default_spawn_ring() -> Vec<Vec3> {
    // Eight points on a ring, facing arbitrary directions; the dynamics
    // collaborator orients the car on its first step.
    (0..8)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / 8.0;
            Vec3::new(angle.cos() * 40.0, 0.0, angle.sin() * 40.0)
        })
        .collect()
}
