//! Performance benchmarks for the per-tick hot paths.

use server::collision::{CollisionConfig, CollisionResolver, ContactPoint, ContactReport};
use server::game::World;
use server::replicate::Replicator;
use shared::channel::ReliableChannel;
use shared::math::Vec3;
use shared::protocol::{
    decode_datagram, encode_body, encode_datagram, Datagram, GameMode, ServerPacket, Team,
};
use shared::vehicle::VehicleClass;
use std::time::{Duration, Instant};

fn populated_world(players: u32) -> World {
    let mut world = World::new(players as usize, 1, GameMode::FreeForAll, "pit".to_string());
    let mut rng = rand::rngs::mock::StepRng::new(0, 1);
    for id in 0..players {
        world.session.join(id, &format!("p{}", id));
        world
            .session
            .select_team(id, if id % 2 == 0 { Team::Red } else { Team::Blue });
        world.spawn_request(id, VehicleClass::Medium, &mut rng);
    }
    world
}

/// Benchmarks collision resolution across a full pairing of 16 vehicles.
#[test]
fn benchmark_collision_resolution() {
    let mut world = populated_world(16);
    let mut resolver = CollisionResolver::new(CollisionConfig {
        cooldown: Duration::ZERO,
        ..CollisionConfig::default()
    });

    let mut reports = Vec::new();
    for first in 0..16u32 {
        for second in (first + 1)..16 {
            reports.push(ContactReport {
                first,
                second,
                contacts: vec![ContactPoint {
                    point: Vec3::new(1.0, 0.0, 1.0),
                    penetration: 0.005,
                }],
                speed_first: 20.0,
                speed_second: 15.0,
            });
        }
    }

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        // Keep everyone alive so every report resolves.
        for id in 0..16u32 {
            world.session.reset_health(id);
        }
        resolver.resolve(&reports, &mut world, Instant::now());
    }
    let duration = start.elapsed();
    println!(
        "Collision resolution: {} ticks of {} pairs in {:?} ({:.2} µs/tick)",
        iterations,
        reports.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // A full pairing must fit comfortably inside a 33ms tick.
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks snapshot generation for a full server.
#[test]
fn benchmark_snapshot_generation() {
    let mut world = populated_world(16);
    let mut replicator = Replicator::new();

    let iterations = 10_000;
    let start = Instant::now();
    for tick in 0..iterations {
        world.tick = tick;
        let (snapshots, _) = replicator.tick_outputs(&world);
        assert_eq!(snapshots.len(), 16);
    }
    let duration = start.elapsed();
    println!(
        "Snapshot generation: {} ticks in {:?} ({:.2} µs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks wire encode/decode of a snapshot datagram.
#[test]
fn benchmark_snapshot_codec() {
    let mut world = populated_world(1);
    world.tick = 9;
    let mut replicator = Replicator::new();
    let (snapshots, _) = replicator.tick_outputs(&world);
    let packet = ServerPacket::Snapshot(snapshots[0].clone());

    let iterations = 100_000;
    let start = Instant::now();
    for seq in 0..iterations {
        let body = encode_body(&packet).unwrap();
        let bytes = encode_datagram(&Datagram::Sequenced { seq, body }).unwrap();
        let _ = decode_datagram(&bytes).unwrap();
    }
    let duration = start.elapsed();
    println!(
        "Snapshot codec: {} round trips in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );
    assert!(duration.as_secs() < 5);
}

/// Benchmarks the reliable channel under sustained traffic.
#[test]
fn benchmark_reliable_channel_throughput() {
    let mut tx = ReliableChannel::new(Duration::from_millis(100));
    let mut rx = ReliableChannel::new(Duration::from_millis(100));

    let frames = 50_000u32;
    let start = Instant::now();
    let mut delivered = 0usize;
    for i in 0..frames {
        tx.push(i.to_le_bytes().to_vec());
        for (seq, body) in tx.frames_to_send(Instant::now()) {
            delivered += rx.on_frame(seq, body).len();
        }
        if let Some(upto) = rx.take_ack() {
            tx.on_ack(upto);
        }
    }
    let duration = start.elapsed();
    println!(
        "Reliable channel: {} frames in {:?} ({:.2} ns/frame)",
        frames,
        duration,
        duration.as_nanos() as f64 / frames as f64
    );

    assert_eq!(delivered, frames as usize);
    assert!(!tx.has_unacked());
    assert!(duration.as_secs() < 5);
}
