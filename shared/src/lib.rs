//! Types shared between the server and client roles of the vehicle-combat
//! session: the wire protocol, the delivery-class state machines layered
//! under it, and the vehicle classification data both sides agree on.

pub mod channel;
pub mod math;
pub mod protocol;
pub mod vehicle;

/// Full health of a freshly spawned vehicle.
pub const MAX_HEALTH: f32 = 100.0;

/// Connections silent for longer than this are treated as lost.
pub const CONNECTION_TIMEOUT_SECS: u64 = 5;

pub use math::{Quat, Vec3};
pub use protocol::{
    decode_body, decode_datagram, encode_body, encode_datagram, ClientPacket, Datagram, EntityId,
    GameMode, InputSample, ServerPacket, SessionEvent, SpawnVerdict, Team, VehicleSnapshot,
    WireError, PROTOCOL_VERSION,
};
pub use vehicle::{Section, VehicleClass, SECTION_COUNT};
