//! # Vehicle-Combat Game Client
//!
//! Client-side networking core for the multiplayer session. The client
//! never simulates other players; it keeps a read-only mirror of the
//! authoritative state the server replicates and uploads local control
//! input at a fixed rate.
//!
//! ## Module Organization
//!
//! - [`network`]: UDP transport, join handshake, delivery channels, and
//!   the fixed-rate input upload loop.
//! - [`mirror`]: the local replica of remote entities and session state,
//!   with the stale-snapshot drop rule.
//! - [`input`]: the seam toward whatever polls the input device.
//!
//! Rendering, device polling, and local vehicle dynamics are external
//! collaborators; this crate exposes [`mirror::Mirror`] for them to read
//! and [`input::InputSource`] for them to implement.

pub mod input;
pub mod mirror;
pub mod network;
