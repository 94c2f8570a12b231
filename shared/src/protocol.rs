//! Wire protocol shared by the server and client roles.
//!
//! Every datagram on the wire is a one-byte protocol version followed by a
//! bincode-encoded [`Datagram`]. The datagram header carries the delivery
//! class and sequencing metadata; the opaque body is a bincode-encoded
//! [`ClientPacket`] or [`ServerPacket`]. Keeping the framing separate from
//! the application messages means the in-memory types can evolve without
//! touching the sequencing layer, and a version bump is a single constant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Quat, Vec3};
use crate::vehicle::{VehicleClass, SECTION_COUNT};

/// Bumped on every incompatible wire change. A mismatch is rejected at
/// decode time before any body parsing happens.
pub const PROTOCOL_VERSION: u8 = 1;

/// Identifies one player entity. Network players use their connection id,
/// which is unique for the lifetime of the session and never reused.
pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opposing(&self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    FreeForAll,
    TeamBattle,
    Vip,
}

/// One tick's worth of control input, client to server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InputSample {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub handbrake: bool,
}

/// One replicated state sample for a single entity at a single server tick.
///
/// `stamp` is the generating server tick and is strictly increasing per
/// entity; receivers discard any snapshot older than the last one applied.
/// `health` is present only on ticks where the value changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub entity_id: EntityId,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_vel: Vec3,
    pub angular_vel: Vec3,
    pub steer_angle: f32,
    pub stamp: u64,
    pub health: Option<f32>,
}

/// Verdict on a spawn request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnVerdict {
    /// Vehicle placed in the arena, entity is in-game.
    Spawned,
    /// Accepted but parked until the match starts.
    Queued,
    Rejected { reason: String },
}

/// The closed set of session events. All of these travel reliable-ordered;
/// extending the protocol means adding a variant here, not registering a
/// named handler somewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Join {
        conn_id: EntityId,
        team: Option<Team>,
        nickname: String,
    },
    Leave {
        conn_id: EntityId,
        reason: String,
    },
    Chat {
        conn_id: EntityId,
        text: String,
    },
    TeamSelectResult {
        conn_id: EntityId,
        team: Team,
        accepted: bool,
    },
    SpawnResult {
        conn_id: EntityId,
        vehicle_class: VehicleClass,
        verdict: SpawnVerdict,
    },
    Death {
        victim: EntityId,
        killer: EntityId,
    },
    VipDeclared {
        entity_id: EntityId,
    },
    ScoreSync {
        scores: Vec<(EntityId, u32, u32)>,
    },
    GameModeSync {
        mode: GameMode,
        arena: String,
    },
    TimeSync {
        elapsed_ms: u64,
    },
    NicknameChange {
        conn_id: EntityId,
        name: String,
    },
}

/// Messages originated by the client role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientPacket {
    Connect {
        protocol_version: u8,
        nickname: String,
    },
    Input(InputSample),
    TeamSelect {
        team: Team,
    },
    SpawnRequest {
        vehicle_class: VehicleClass,
    },
    Chat {
        text: String,
    },
    SetNickname {
        name: String,
    },
    Disconnect,
}

/// Messages originated by the server role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerPacket {
    ConnectAccepted {
        conn_id: EntityId,
        max_health: f32,
        /// Roster of already-present players so a late joiner starts with a
        /// full mirror: (id, nickname, team, health, alive).
        roster: Vec<(EntityId, String, Option<Team>, f32, bool)>,
    },
    ConnectRejected {
        reason: String,
    },
    Snapshot(VehicleSnapshot),
    /// Edge-triggered health update with per-section damage detail.
    Damage {
        entity_id: EntityId,
        health: f32,
        sections: [f32; SECTION_COUNT],
    },
    Event(SessionEvent),
}

/// On-the-wire frame: delivery class plus sequencing metadata around an
/// opaque packet body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datagram {
    /// Unreliable-sequenced class: may be lost, never applied out of order.
    Sequenced { seq: u32, body: Vec<u8> },
    /// Reliable-ordered class: retransmitted until acknowledged, delivered
    /// exactly once in send order.
    Reliable { seq: u32, body: Vec<u8> },
    /// Cumulative acknowledgement of every reliable frame up to `upto`.
    Ack { upto: u32 },
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram too short to carry a header")]
    Truncated,
    #[error("protocol version mismatch: got {got}, expected {PROTOCOL_VERSION}")]
    Version { got: u8 },
    #[error("malformed body: {0}")]
    Body(#[from] bincode::Error),
}

pub fn encode_datagram(datagram: &Datagram) -> Result<Vec<u8>, WireError> {
    let mut bytes = vec![PROTOCOL_VERSION];
    bytes.extend(bincode::serialize(datagram)?);
    Ok(bytes)
}

pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram, WireError> {
    match bytes.split_first() {
        None => Err(WireError::Truncated),
        Some((&version, _)) if version != PROTOCOL_VERSION => {
            Err(WireError::Version { got: version })
        }
        Some((_, body)) => Ok(bincode::deserialize(body)?),
    }
}

pub fn encode_body<T: Serialize>(packet: &T) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(packet)?)
}

pub fn decode_body<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WireError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_roundtrip() {
        let body = encode_body(&ClientPacket::Input(InputSample {
            forward: true,
            handbrake: true,
            ..Default::default()
        }))
        .unwrap();
        let wire = encode_datagram(&Datagram::Sequenced { seq: 7, body }).unwrap();

        match decode_datagram(&wire).unwrap() {
            Datagram::Sequenced { seq, body } => {
                assert_eq!(seq, 7);
                match decode_body::<ClientPacket>(&body).unwrap() {
                    ClientPacket::Input(sample) => {
                        assert!(sample.forward);
                        assert!(sample.handbrake);
                        assert!(!sample.left);
                    }
                    other => panic!("wrong packet type: {:?}", other),
                }
            }
            other => panic!("wrong datagram type: {:?}", other),
        }
    }

    #[test]
    fn test_empty_datagram_is_truncated() {
        assert!(matches!(decode_datagram(&[]), Err(WireError::Truncated)));
    }

    #[test]
    fn test_version_mismatch_rejected_before_body() {
        let body = encode_body(&ClientPacket::Disconnect).unwrap();
        let mut wire = encode_datagram(&Datagram::Reliable { seq: 0, body }).unwrap();
        wire[0] = PROTOCOL_VERSION.wrapping_add(1);

        match decode_datagram(&wire) {
            Err(WireError::Version { got }) => {
                assert_eq!(got, PROTOCOL_VERSION.wrapping_add(1));
            }
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_body_is_error_not_panic() {
        let wire = [PROTOCOL_VERSION, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(decode_datagram(&wire).is_err());
    }

    #[test]
    fn test_event_roundtrip() {
        let event = SessionEvent::SpawnResult {
            conn_id: 3,
            vehicle_class: VehicleClass::Heavy,
            verdict: SpawnVerdict::Rejected {
                reason: "no team chosen".to_string(),
            },
        };
        let body = encode_body(&ServerPacket::Event(event)).unwrap();

        match decode_body::<ServerPacket>(&body).unwrap() {
            ServerPacket::Event(SessionEvent::SpawnResult {
                conn_id, verdict, ..
            }) => {
                assert_eq!(conn_id, 3);
                assert_eq!(
                    verdict,
                    SpawnVerdict::Rejected {
                        reason: "no team chosen".to_string()
                    }
                );
            }
            other => panic!("wrong packet: {:?}", other),
        }
    }
}
