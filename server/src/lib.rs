//! # Authoritative Vehicle-Combat Server
//!
//! This library holds the server role of the multiplayer session: the
//! single source of truth for every connected player's vehicle state and
//! health. Clients mirror this state and send control input upstream;
//! everything authoritative happens here.
//!
//! ## Module Organization
//!
//! - [`session`]: the authoritative player table (admission, team
//!   balance, spawn queueing, departure with the double-leave guard).
//! - [`events`]: the closed set of session events with explicit per-event
//!   targeting, drained once per tick onto the reliable-ordered class.
//! - [`replicate`]: per-tick vehicle snapshots and edge-triggered health
//!   updates.
//! - [`collision`]: turns raw physics contact reports into exactly-once
//!   damage and death state changes, deduplicated per entity pair.
//! - [`game`]: world state glue (match lifecycle, scores, VIP, and the
//!   seams toward the external dynamics and physics collaborators).
//! - [`network`]: UDP socket handling, per-connection delivery channels,
//!   and the fixed-rate tick loop that drives all of the above.
//!
//! ## Concurrency Model
//!
//! One single-threaded game loop owns all entity state. A background task
//! only moves raw datagrams from the socket into the loop's inbox; the
//! loop drains everything available at the top of each tick and flushes
//! all outbound traffic at the end. No locks guard entity state because
//! nothing else can touch it.

pub mod collision;
pub mod events;
pub mod game;
pub mod network;
pub mod replicate;
pub mod session;
