//! Local mirror of the authoritative game state.
//!
//! The mirror holds read-only replicas of every remote entity plus the
//! client's own health and damage detail. Remote vehicle state is
//! replace-only: a snapshot is applied whole or not at all, and only when
//! its stamp is newer than the last one applied for that entity. Snapshots
//! for the locally-driven entity are never applied; that entity's
//! authoritative state is the local simulation, not the network echo.

use log::{debug, info};
use shared::math::{Quat, Vec3};
use shared::protocol::{
    EntityId, GameMode, SessionEvent, SpawnVerdict, Team, VehicleSnapshot,
};
use shared::vehicle::SECTION_COUNT;
use std::collections::HashMap;

/// Replica of one remote player.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub nickname: String,
    pub team: Option<Team>,
    pub health: f32,
    pub alive: bool,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_vel: Vec3,
    pub angular_vel: Vec3,
    pub steer_angle: f32,
    /// Stamp of the newest snapshot applied for this entity.
    last_stamp: Option<u64>,
}

impl RemoteEntity {
    fn new(id: EntityId, nickname: String, team: Option<Team>, health: f32, alive: bool) -> Self {
        RemoteEntity {
            id,
            nickname,
            team,
            health,
            alive,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            linear_vel: Vec3::ZERO,
            angular_vel: Vec3::ZERO,
            steer_angle: 0.0,
            last_stamp: None,
        }
    }
}

/// One line of received chat, kept for the UI collaborator.
#[derive(Debug, Clone)]
pub struct ChatLine {
    pub from: EntityId,
    pub text: String,
}

pub struct Mirror {
    own_id: EntityId,
    max_health: f32,
    entities: HashMap<EntityId, RemoteEntity>,

    pub own_health: f32,
    pub own_sections: [f32; SECTION_COUNT],
    pub own_alive: bool,

    pub mode: Option<GameMode>,
    pub arena: String,
    pub elapsed_ms: u64,
    pub vip: Option<EntityId>,
    pub scores: Vec<(EntityId, u32, u32)>,
    pub chat: Vec<ChatLine>,
}

impl Mirror {
    /// Builds the mirror from the join handshake: our id, full health, and
    /// the roster of players already present.
    pub fn new(
        own_id: EntityId,
        max_health: f32,
        roster: Vec<(EntityId, String, Option<Team>, f32, bool)>,
    ) -> Self {
        let entities = roster
            .into_iter()
            .map(|(id, nickname, team, health, alive)| {
                (id, RemoteEntity::new(id, nickname, team, health, alive))
            })
            .collect();
        Mirror {
            own_id,
            max_health,
            entities,
            own_health: max_health,
            own_sections: [0.0; SECTION_COUNT],
            own_alive: false,
            mode: None,
            arena: String::new(),
            elapsed_ms: 0,
            vip: None,
            scores: Vec::new(),
            chat: Vec::new(),
        }
    }

    pub fn own_id(&self) -> EntityId {
        self.own_id
    }

    pub fn entity(&self, id: EntityId) -> Option<&RemoteEntity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    /// Applies a vehicle snapshot under the staleness rule: strictly newer
    /// stamps replace, anything else is dropped. Our own echo is never
    /// applied. Snapshots for ids no longer (or not yet) in the roster are
    /// silently ignored; they raced a leave.
    pub fn apply_snapshot(&mut self, snapshot: &VehicleSnapshot) {
        if snapshot.entity_id == self.own_id {
            return;
        }
        let Some(entity) = self.entities.get_mut(&snapshot.entity_id) else {
            return;
        };
        if let Some(last) = entity.last_stamp {
            if snapshot.stamp <= last {
                debug!(
                    "Dropping stale snapshot for {} (stamp {} <= {})",
                    snapshot.entity_id, snapshot.stamp, last
                );
                return;
            }
        }

        entity.last_stamp = Some(snapshot.stamp);
        entity.position = snapshot.position;
        entity.orientation = snapshot.orientation;
        entity.linear_vel = snapshot.linear_vel;
        entity.angular_vel = snapshot.angular_vel;
        entity.steer_angle = snapshot.steer_angle;
        if let Some(health) = snapshot.health {
            entity.health = health;
        }
    }

    /// Applies a reliable damage update. Detail for our own entity lands
    /// in the local section array; remote detail only carries health.
    pub fn apply_damage(&mut self, entity_id: EntityId, health: f32, sections: [f32; SECTION_COUNT]) {
        if entity_id == self.own_id {
            self.own_health = health;
            self.own_sections = sections;
        } else if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.health = health;
        }
    }

    /// Applies a session event. Ids that have since left the table are
    /// tolerated everywhere: a late event is dropped, never an error.
    pub fn apply_event(&mut self, event: SessionEvent) {
        let full = self.max_health;
        match event {
            SessionEvent::Join {
                conn_id,
                team,
                nickname,
            } => {
                info!("{} joined", nickname);
                self.entities.entry(conn_id).or_insert_with(|| {
                    RemoteEntity::new(conn_id, nickname, team, full, false)
                });
            }
            SessionEvent::Leave { conn_id, reason } => {
                if let Some(entity) = self.entities.remove(&conn_id) {
                    info!("{} left: {}", entity.nickname, reason);
                }
            }
            SessionEvent::Chat { conn_id, text } => {
                self.chat.push(ChatLine {
                    from: conn_id,
                    text,
                });
            }
            SessionEvent::TeamSelectResult {
                conn_id,
                team,
                accepted,
            } => {
                if accepted {
                    if conn_id == self.own_id {
                        // Own team is tracked by the frontend; nothing to
                        // mirror here.
                    } else if let Some(entity) = self.entities.get_mut(&conn_id) {
                        entity.team = Some(team);
                    }
                }
            }
            SessionEvent::SpawnResult {
                conn_id, verdict, ..
            } => {
                if verdict == SpawnVerdict::Spawned {
                    if conn_id == self.own_id {
                        self.own_alive = true;
                        self.own_health = full;
                        self.own_sections = [0.0; SECTION_COUNT];
                    } else if let Some(entity) = self.entities.get_mut(&conn_id) {
                        entity.alive = true;
                        entity.health = full;
                    }
                }
            }
            SessionEvent::Death { victim, .. } => {
                if victim == self.own_id {
                    self.own_alive = false;
                    self.own_health = 0.0;
                } else if let Some(entity) = self.entities.get_mut(&victim) {
                    entity.alive = false;
                    entity.health = 0.0;
                }
            }
            SessionEvent::VipDeclared { entity_id } => self.vip = Some(entity_id),
            SessionEvent::ScoreSync { scores } => self.scores = scores,
            SessionEvent::GameModeSync { mode, arena } => {
                self.mode = Some(mode);
                self.arena = arena;
            }
            SessionEvent::TimeSync { elapsed_ms } => self.elapsed_ms = elapsed_ms,
            SessionEvent::NicknameChange { conn_id, name } => {
                if let Some(entity) = self.entities.get_mut(&conn_id) {
                    entity.nickname = name;
                }
            }
        }
    }
}
