//! Connection and session management for the authoritative server
//!
//! This module owns the authoritative player table and each entity's
//! per-session state machine:
//! - Admission (capacity and duplicate-connection checks)
//! - Team selection with the balance rule
//! - Spawn requests, including queueing before match start
//! - Departure, guarded so an explicit quit and a timeout can never both
//!   produce a leave for the same connection
//!
//! The table is exclusively owned and mutated by the server's tick loop;
//! there is no concurrent access to entity state.

use log::info;
use shared::math::{Quat, Vec3};
use shared::protocol::{EntityId, InputSample, Team};
use shared::vehicle::{Section, VehicleClass, SECTION_COUNT};
use shared::MAX_HEALTH;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-entity session state machine.
///
/// `TeamSelect -> SpawnSelect -> (WaitForGameStart | InGame) -> Spectate`,
/// with `InGame -> SpawnSelect` on each death-then-respawn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    TeamSelect,
    SpawnSelect,
    WaitForGameStart,
    InGame,
    Spectate,
}

/// Motion state of a spawned vehicle, as produced by the external dynamics
/// model. This core only stores and replicates it.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub class: VehicleClass,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_vel: Vec3,
    pub angular_vel: Vec3,
    pub steer_angle: f32,
    /// Current speed as reported by the physics collaborator.
    pub speed: f32,
}

impl Vehicle {
    pub fn at(class: VehicleClass, position: Vec3) -> Self {
        Vehicle {
            class,
            position,
            orientation: Quat::IDENTITY,
            linear_vel: Vec3::ZERO,
            angular_vel: Vec3::ZERO,
            steer_angle: 0.0,
            speed: 0.0,
        }
    }
}

/// One player in the authoritative table.
#[derive(Debug, Clone)]
pub struct PlayerEntity {
    /// Owning connection id (or a synthetic id for non-networked agents).
    pub id: EntityId,
    pub nickname: String,
    pub team: Option<Team>,
    /// Current health in `[0, MAX_HEALTH]`. Only ever decreased by resolved
    /// collision damage and restored by an explicit reset.
    pub health: f32,
    pub round_score: u32,
    pub game_score: u32,
    pub alive: bool,
    /// Absent before the first spawn and between death and respawn.
    pub vehicle: Option<Vehicle>,
    pub phase: SessionPhase,
    /// Cumulative per-section damage, replicated for display.
    pub section_damage: [f32; SECTION_COUNT],
    /// Most recent control input received from the owning connection.
    pub last_input: InputSample,
    /// Last time any traffic arrived from the owning connection.
    pub last_seen: Instant,
}

impl PlayerEntity {
    fn new(id: EntityId, nickname: String) -> Self {
        PlayerEntity {
            id,
            nickname,
            team: None,
            health: MAX_HEALTH,
            round_score: 0,
            game_score: 0,
            alive: false,
            vehicle: None,
            phase: SessionPhase::TeamSelect,
            section_damage: [0.0; SECTION_COUNT],
            last_input: InputSample::default(),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted,
    /// The table is at its configured capacity.
    AtCapacity,
    /// The connection already owns an entity.
    AlreadyJoined,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TeamSelectOutcome {
    Accepted,
    /// Joining would leave the requested team with strictly more members
    /// than the other.
    Unbalanced,
    /// Entity is not in a phase where team choice is legal.
    WrongPhase,
    UnknownEntity,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned,
    /// Accepted, but parked until the match starts.
    Queued,
    NoTeam,
    WrongPhase,
    UnknownEntity,
}

/// Owns the authoritative player table and enforces admission, balance and
/// lifecycle rules.
pub struct SessionManager {
    players: HashMap<EntityId, PlayerEntity>,
    max_players: usize,
}

impl SessionManager {
    pub fn new(max_players: usize) -> Self {
        SessionManager {
            players: HashMap::new(),
            max_players,
        }
    }

    /// Admits a connection into the session.
    ///
    /// Rejected when the table is at capacity or the connection already has
    /// an entity; on acceptance the entity starts in `TeamSelect`.
    pub fn join(&mut self, conn_id: EntityId, nickname: &str) -> JoinOutcome {
        if self.players.contains_key(&conn_id) {
            return JoinOutcome::AlreadyJoined;
        }
        if self.players.len() >= self.max_players {
            return JoinOutcome::AtCapacity;
        }

        info!("Player {} ({}) joined", conn_id, nickname);
        self.players
            .insert(conn_id, PlayerEntity::new(conn_id, nickname.to_string()));
        JoinOutcome::Accepted
    }

    /// Removes the connection's entity.
    ///
    /// Returns false (no-op) when the connection has no entity. This is the
    /// guard that keeps an explicit quit and a later timeout signal from
    /// both producing a leave broadcast.
    pub fn leave(&mut self, conn_id: EntityId, reason: &str) -> bool {
        if let Some(player) = self.players.remove(&conn_id) {
            info!("Player {} ({}) left: {}", conn_id, player.nickname, reason);
            true
        } else {
            false
        }
    }

    /// Applies the team-balance rule: a request to join team X is rejected
    /// if X would end up with strictly more members than the other team.
    pub fn select_team(&mut self, conn_id: EntityId, team: Team) -> TeamSelectOutcome {
        let (mut red, mut blue) = self.team_counts();
        let Some(player) = self.players.get_mut(&conn_id) else {
            return TeamSelectOutcome::UnknownEntity;
        };
        if !matches!(
            player.phase,
            SessionPhase::TeamSelect | SessionPhase::SpawnSelect
        ) {
            return TeamSelectOutcome::WrongPhase;
        }

        // Judge the request on post-move sizes: the requester's current
        // side must not count them, or a switch slips past the rule.
        match player.team {
            Some(Team::Red) => red -= 1,
            Some(Team::Blue) => blue -= 1,
            None => {}
        }
        let (requested, other) = match team {
            Team::Red => (red, blue),
            Team::Blue => (blue, red),
        };
        if requested > other {
            return TeamSelectOutcome::Unbalanced;
        }

        player.team = Some(team);
        player.phase = SessionPhase::SpawnSelect;
        TeamSelectOutcome::Accepted
    }

    /// Handles a spawn request. `match_started` decides between going
    /// straight in-game and being queued in `WaitForGameStart`.
    pub fn spawn(
        &mut self,
        conn_id: EntityId,
        vehicle: Vehicle,
        match_started: bool,
    ) -> SpawnOutcome {
        let Some(player) = self.players.get_mut(&conn_id) else {
            return SpawnOutcome::UnknownEntity;
        };
        if player.team.is_none() {
            return SpawnOutcome::NoTeam;
        }
        if player.phase != SessionPhase::SpawnSelect {
            return SpawnOutcome::WrongPhase;
        }

        player.vehicle = Some(vehicle);
        player.health = MAX_HEALTH;
        player.section_damage = [0.0; SECTION_COUNT];
        if match_started {
            player.phase = SessionPhase::InGame;
            player.alive = true;
            SpawnOutcome::Spawned
        } else {
            player.phase = SessionPhase::WaitForGameStart;
            SpawnOutcome::Queued
        }
    }

    /// Promotes every entity parked in `WaitForGameStart` to `InGame`.
    /// Called once when the match starts; returns the promoted ids.
    pub fn promote_queued(&mut self) -> Vec<EntityId> {
        let mut promoted = Vec::new();
        for player in self.players.values_mut() {
            if player.phase == SessionPhase::WaitForGameStart {
                player.phase = SessionPhase::InGame;
                player.alive = true;
                promoted.push(player.id);
            }
        }
        promoted.sort_unstable();
        promoted
    }

    /// Applies collision damage. Health is clamped at zero; returns the new
    /// value, or None for an unknown or already-dead entity.
    pub fn apply_damage(&mut self, conn_id: EntityId, amount: f32, section: Section) -> Option<f32> {
        let player = self.players.get_mut(&conn_id)?;
        if !player.alive {
            return None;
        }
        player.health = (player.health - amount).max(0.0);
        player.section_damage[section.index()] += amount;
        Some(player.health)
    }

    /// Transitions a dead entity back into the respawn cycle.
    pub fn mark_dead(&mut self, conn_id: EntityId) {
        if let Some(player) = self.players.get_mut(&conn_id) {
            player.alive = false;
            player.vehicle = None;
            player.phase = SessionPhase::SpawnSelect;
            info!("Player {} ({}) wrecked", conn_id, player.nickname);
        }
    }

    /// The one health-increasing operation: reset to full.
    pub fn reset_health(&mut self, conn_id: EntityId) {
        if let Some(player) = self.players.get_mut(&conn_id) {
            player.health = MAX_HEALTH;
            player.section_damage = [0.0; SECTION_COUNT];
        }
    }

    pub fn spectate(&mut self, conn_id: EntityId) {
        if let Some(player) = self.players.get_mut(&conn_id) {
            player.phase = SessionPhase::Spectate;
            player.alive = false;
            player.vehicle = None;
        }
    }

    pub fn set_nickname(&mut self, conn_id: EntityId, name: &str) -> bool {
        if let Some(player) = self.players.get_mut(&conn_id) {
            player.nickname = name.to_string();
            true
        } else {
            false
        }
    }

    /// Records traffic from a connection for timeout tracking.
    pub fn touch(&mut self, conn_id: EntityId) {
        if let Some(player) = self.players.get_mut(&conn_id) {
            player.last_seen = Instant::now();
        }
    }

    /// Ids of connections silent for longer than `timeout`. Does not remove
    /// them: the caller routes each through the single `leave` path.
    pub fn timed_out(&self, timeout: Duration) -> Vec<EntityId> {
        self.players
            .values()
            .filter(|p| p.last_seen.elapsed() > timeout)
            .map(|p| p.id)
            .collect()
    }

    pub fn team_counts(&self) -> (usize, usize) {
        let mut red = 0;
        let mut blue = 0;
        for player in self.players.values() {
            match player.team {
                Some(Team::Red) => red += 1,
                Some(Team::Blue) => blue += 1,
                None => {}
            }
        }
        (red, blue)
    }

    pub fn entity(&self, conn_id: EntityId) -> Option<&PlayerEntity> {
        self.players.get(&conn_id)
    }

    pub fn entity_mut(&mut self, conn_id: EntityId) -> Option<&mut PlayerEntity> {
        self.players.get_mut(&conn_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut PlayerEntity> {
        self.players.values_mut()
    }

    pub fn is_alive(&self, conn_id: EntityId) -> bool {
        self.players.get(&conn_id).map(|p| p.alive).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(n: usize) -> SessionManager {
        let mut manager = SessionManager::new(8);
        for id in 0..n as u32 {
            assert_eq!(manager.join(id, &format!("p{}", id)), JoinOutcome::Accepted);
        }
        manager
    }

    fn spawn_vehicle() -> Vehicle {
        Vehicle::at(VehicleClass::Medium, Vec3::ZERO)
    }

    #[test]
    fn test_join_starts_in_team_select() {
        let manager = manager_with(1);
        let player = manager.entity(0).unwrap();
        assert_eq!(player.phase, SessionPhase::TeamSelect);
        assert_eq!(player.health, MAX_HEALTH);
        assert!(!player.alive);
        assert!(player.vehicle.is_none());
    }

    #[test]
    fn test_join_at_capacity_rejected() {
        let mut manager = SessionManager::new(2);
        assert_eq!(manager.join(0, "a"), JoinOutcome::Accepted);
        assert_eq!(manager.join(1, "b"), JoinOutcome::Accepted);
        assert_eq!(manager.join(2, "c"), JoinOutcome::AtCapacity);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_duplicate_join_rejected() {
        let mut manager = manager_with(1);
        assert_eq!(manager.join(0, "again"), JoinOutcome::AlreadyJoined);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_double_leave_fires_once() {
        let mut manager = manager_with(1);
        assert!(manager.leave(0, "quit"));
        assert!(!manager.leave(0, "timeout"));
    }

    #[test]
    fn test_team_balance_rule() {
        let mut manager = manager_with(3);
        assert_eq!(manager.select_team(0, Team::Red), TeamSelectOutcome::Accepted);
        // Red 1, Blue 0: red is now strictly ahead, so red is closed.
        assert_eq!(
            manager.select_team(1, Team::Red),
            TeamSelectOutcome::Unbalanced
        );
        assert_eq!(
            manager.select_team(1, Team::Blue),
            TeamSelectOutcome::Accepted
        );
        // 1-1 again: either side opens up.
        assert_eq!(manager.select_team(2, Team::Red), TeamSelectOutcome::Accepted);

        let (red, blue) = manager.team_counts();
        assert!(red.abs_diff(blue) <= 1);
    }

    #[test]
    fn test_team_switch_cannot_unbalance() {
        let mut manager = manager_with(2);
        assert_eq!(manager.select_team(0, Team::Red), TeamSelectOutcome::Accepted);
        assert_eq!(
            manager.select_team(1, Team::Blue),
            TeamSelectOutcome::Accepted
        );

        // At 1-1, leaving red would strand the sides at 0-2.
        assert_eq!(
            manager.select_team(0, Team::Blue),
            TeamSelectOutcome::Unbalanced
        );
        assert_eq!(manager.entity(0).unwrap().team, Some(Team::Red));

        // A third player on red makes the same switch legal: 2-1 -> 1-2.
        manager.join(2, "c");
        assert_eq!(manager.select_team(2, Team::Red), TeamSelectOutcome::Accepted);
        assert_eq!(
            manager.select_team(2, Team::Blue),
            TeamSelectOutcome::Accepted
        );
        let (red, blue) = manager.team_counts();
        assert!(red.abs_diff(blue) <= 1);
    }

    #[test]
    fn test_reselecting_own_team_is_accepted() {
        let mut manager = manager_with(1);
        assert_eq!(manager.select_team(0, Team::Red), TeamSelectOutcome::Accepted);
        assert_eq!(manager.select_team(0, Team::Red), TeamSelectOutcome::Accepted);
    }

    #[test]
    fn test_spawn_without_team_rejected() {
        let mut manager = manager_with(1);
        assert_eq!(
            manager.spawn(0, spawn_vehicle(), true),
            SpawnOutcome::NoTeam
        );
        assert!(manager.entity(0).unwrap().vehicle.is_none());
    }

    #[test]
    fn test_spawn_queued_before_match_start() {
        let mut manager = manager_with(1);
        manager.select_team(0, Team::Red);
        assert_eq!(
            manager.spawn(0, spawn_vehicle(), false),
            SpawnOutcome::Queued
        );
        let player = manager.entity(0).unwrap();
        assert_eq!(player.phase, SessionPhase::WaitForGameStart);
        assert!(!player.alive);

        let promoted = manager.promote_queued();
        assert_eq!(promoted, vec![0]);
        assert!(manager.entity(0).unwrap().alive);
        assert_eq!(manager.entity(0).unwrap().phase, SessionPhase::InGame);
    }

    #[test]
    fn test_spawn_while_ingame_rejected() {
        let mut manager = manager_with(1);
        manager.select_team(0, Team::Red);
        assert_eq!(
            manager.spawn(0, spawn_vehicle(), true),
            SpawnOutcome::Spawned
        );
        assert_eq!(
            manager.spawn(0, spawn_vehicle(), true),
            SpawnOutcome::WrongPhase
        );
    }

    #[test]
    fn test_death_returns_to_spawn_select() {
        let mut manager = manager_with(1);
        manager.select_team(0, Team::Blue);
        manager.spawn(0, spawn_vehicle(), true);

        manager.apply_damage(0, MAX_HEALTH, Section::FrontLeft);
        manager.mark_dead(0);

        let player = manager.entity(0).unwrap();
        assert_eq!(player.phase, SessionPhase::SpawnSelect);
        assert!(!player.alive);
        assert!(player.vehicle.is_none());

        // Respawn is legal again and restores full health.
        assert_eq!(
            manager.spawn(0, spawn_vehicle(), true),
            SpawnOutcome::Spawned
        );
        assert_eq!(manager.entity(0).unwrap().health, MAX_HEALTH);
    }

    #[test]
    fn test_damage_clamped_and_accumulated_per_section() {
        let mut manager = manager_with(1);
        manager.select_team(0, Team::Red);
        manager.spawn(0, spawn_vehicle(), true);

        assert_eq!(manager.apply_damage(0, 30.0, Section::MidLeft), Some(70.0));
        assert_eq!(manager.apply_damage(0, 200.0, Section::MidLeft), Some(0.0));

        let player = manager.entity(0).unwrap();
        assert_eq!(player.section_damage[Section::MidLeft.index()], 230.0);
    }

    #[test]
    fn test_damage_to_dead_entity_ignored() {
        let mut manager = manager_with(1);
        manager.select_team(0, Team::Red);
        manager.spawn(0, spawn_vehicle(), true);
        manager.apply_damage(0, MAX_HEALTH, Section::RearRight);
        manager.mark_dead(0);

        assert_eq!(manager.apply_damage(0, 10.0, Section::RearRight), None);
    }

    #[test]
    fn test_timeout_detection_without_removal() {
        let mut manager = manager_with(2);
        manager.entity_mut(0).unwrap().last_seen =
            Instant::now() - Duration::from_secs(30);

        let silent = manager.timed_out(Duration::from_secs(5));
        assert_eq!(silent, vec![0]);
        // Detection alone does not mutate the table.
        assert_eq!(manager.len(), 2);
    }
}
