//! Server network layer: UDP socket handling, per-connection delivery
//! channels, and the fixed-rate tick loop that drives every subsystem.
//!
//! A background task moves raw datagrams from the socket into an unbounded
//! channel; the single game loop drains everything available at the top of
//! each tick, steps the systems, and flushes all outbound traffic at the
//! end. All entity state is owned and mutated by that one loop.

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::channel::{ReliableChannel, SequencedChannel};
use shared::protocol::{
    decode_body, decode_datagram, encode_body, encode_datagram, ClientPacket, Datagram, EntityId,
    GameMode, ServerPacket, SessionEvent, SpawnVerdict, PROTOCOL_VERSION,
};
use shared::vehicle::VehicleClass;
use shared::MAX_HEALTH;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::collision::{CollisionConfig, CollisionResolver, ContactReport};
use crate::events::{Dispatcher, Target};
use crate::game::World;
use crate::replicate::Replicator;
use crate::session::JoinOutcome;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub tick_duration: Duration,
    pub max_players: usize,
    pub min_players: usize,
    pub connection_timeout: Duration,
    pub resend_interval: Duration,
    pub mode: GameMode,
    pub arena: String,
    pub collision: CollisionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1:8080".to_string(),
            tick_duration: Duration::from_millis(33),
            max_players: 16,
            min_players: 2,
            connection_timeout: Duration::from_secs(shared::CONNECTION_TIMEOUT_SECS),
            resend_interval: Duration::from_millis(100),
            mode: GameMode::TeamBattle,
            arena: "junkyard".to_string(),
            collision: CollisionConfig::default(),
        }
    }
}

/// One connected client: its address and the two delivery-class endpoints.
struct Connection {
    conn_id: EntityId,
    addr: SocketAddr,
    reliable: ReliableChannel,
    sequenced_in: SequencedChannel,
    sequenced_out: SequencedChannel,
}

impl Connection {
    fn new(conn_id: EntityId, addr: SocketAddr, resend_interval: Duration) -> Self {
        Connection {
            conn_id,
            addr,
            reliable: ReliableChannel::new(resend_interval),
            sequenced_in: SequencedChannel::new(),
            sequenced_out: SequencedChannel::new(),
        }
    }
}

/// The authoritative server process.
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    world: World,
    dispatcher: Dispatcher,
    replicator: Replicator,
    resolver: CollisionResolver,
    connections: HashMap<EntityId, Connection>,
    addr_index: HashMap<SocketAddr, EntityId>,
    /// Connection ids are never reused for the lifetime of the process.
    next_conn_id: EntityId,
    /// Contact reports handed over by the physics collaborator, drained
    /// once per tick.
    pending_contacts: Vec<ContactReport>,
    rng: StdRng,
    net_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    net_rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let world = World::new(
            config.max_players,
            config.min_players,
            config.mode,
            config.arena.clone(),
        );
        let resolver = CollisionResolver::new(config.collision.clone());

        Ok(Server {
            socket,
            config,
            world,
            dispatcher: Dispatcher::new(),
            replicator: Replicator::new(),
            resolver,
            connections: HashMap::new(),
            addr_index: HashMap::new(),
            next_conn_id: 1,
            pending_contacts: Vec::new(),
            rng: StdRng::from_entropy(),
            net_tx,
            net_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Entry point for the physics collaborator: contact reports queued
    /// here are resolved on the next tick.
    pub fn submit_contacts(&mut self, reports: Vec<ContactReport>) {
        self.pending_contacts.extend(reports);
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Spawns the task that moves datagrams off the socket and into the
    /// game loop's inbox.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let net_tx = self.net_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if net_tx.send((buffer[..len].to_vec(), addr)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Main loop: drain inbox, step systems, flush outbound. Fixed rate.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();

        let mut tick_interval = interval(self.config.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Server started");

        loop {
            tick_interval.tick().await;

            // Read everything currently available, then stop.
            while let Ok((bytes, addr)) = self.net_rx.try_recv() {
                self.handle_datagram(&bytes, addr);
            }

            self.step_tick();
            self.flush().await;
        }
    }

    fn handle_datagram(&mut self, bytes: &[u8], addr: SocketAddr) {
        let datagram = match decode_datagram(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                // Malformed traffic is dropped without penalizing the
                // connection; a later valid datagram is still welcome.
                warn!("Malformed datagram from {}: {}", addr, e);
                return;
            }
        };

        let Some(&conn_id) = self.addr_index.get(&addr) else {
            self.handle_handshake(datagram, addr);
            return;
        };
        self.world.session.touch(conn_id);

        match datagram {
            Datagram::Sequenced { seq, body } => {
                let Some(conn) = self.connections.get_mut(&conn_id) else {
                    return;
                };
                if !conn.sequenced_in.accept(seq) {
                    return;
                }
                match decode_body::<ClientPacket>(&body) {
                    Ok(ClientPacket::Input(sample)) => self.world.apply_input(conn_id, sample),
                    Ok(other) => {
                        warn!("Unexpected {:?} on the sequenced class from {}", other, addr)
                    }
                    Err(e) => warn!("Malformed sequenced body from {}: {}", addr, e),
                }
            }
            Datagram::Reliable { seq, body } => {
                let released = match self.connections.get_mut(&conn_id) {
                    Some(conn) => conn.reliable.on_frame(seq, body),
                    None => return,
                };
                for body in released {
                    match decode_body::<ClientPacket>(&body) {
                        Ok(packet) => self.handle_packet(conn_id, packet),
                        Err(e) => warn!("Malformed reliable body from {}: {}", addr, e),
                    }
                }
            }
            Datagram::Ack { upto } => {
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.reliable.on_ack(upto);
                }
            }
        }
    }

    /// First datagram from an unknown address must be a reliable Connect.
    fn handle_handshake(&mut self, datagram: Datagram, addr: SocketAddr) {
        let Datagram::Reliable { seq, body } = datagram else {
            debug!("Ignoring non-handshake datagram from unknown {}", addr);
            return;
        };
        let Ok(ClientPacket::Connect {
            protocol_version,
            nickname,
        }) = decode_body::<ClientPacket>(&body)
        else {
            debug!("Ignoring non-connect handshake from {}", addr);
            return;
        };

        if protocol_version != PROTOCOL_VERSION {
            self.send_oneshot(
                addr,
                &ServerPacket::ConnectRejected {
                    reason: format!(
                        "protocol version mismatch: server {}, client {}",
                        PROTOCOL_VERSION, protocol_version
                    ),
                },
            );
            return;
        }

        let conn_id = self.next_conn_id;
        match self.world.session.join(conn_id, &nickname) {
            JoinOutcome::Accepted => {}
            JoinOutcome::AtCapacity => {
                self.send_oneshot(
                    addr,
                    &ServerPacket::ConnectRejected {
                        reason: "server full".to_string(),
                    },
                );
                return;
            }
            JoinOutcome::AlreadyJoined => {
                // Unreachable with fresh ids; defends the invariant anyway.
                warn!("Connection id {} already owns an entity", conn_id);
                return;
            }
        }
        self.next_conn_id += 1;

        let mut conn = Connection::new(conn_id, addr, self.config.resend_interval);
        // The Connect frame was consumed before this channel existed; mark
        // it delivered so the client's retransmissions are absorbed and
        // acked instead of released as duplicates.
        conn.reliable.mark_delivered(seq);

        // Full-state sync goes to the new connection only: the roster in
        // the accept packet, then mode, clock and scores as events.
        let roster = self
            .world
            .session
            .entities()
            .filter(|p| p.id != conn_id)
            .map(|p| (p.id, p.nickname.clone(), p.team, p.health, p.alive))
            .collect();
        Self::queue_reliable(
            &mut conn,
            &ServerPacket::ConnectAccepted {
                conn_id,
                max_health: MAX_HEALTH,
                roster,
            },
        );
        self.addr_index.insert(addr, conn_id);
        self.connections.insert(conn_id, conn);

        self.dispatcher.push(
            SessionEvent::GameModeSync {
                mode: self.world.mode,
                arena: self.world.arena.clone(),
            },
            Target::To(conn_id),
        );
        self.dispatcher.push(
            SessionEvent::TimeSync {
                elapsed_ms: self.world.elapsed_ms(),
            },
            Target::To(conn_id),
        );
        self.dispatcher.push(
            SessionEvent::ScoreSync {
                scores: self.world.score_table(),
            },
            Target::To(conn_id),
        );
        // Everyone else learns about the newcomer.
        self.dispatcher.push(
            SessionEvent::Join {
                conn_id,
                team: None,
                nickname,
            },
            Target::AllExcept(conn_id),
        );
    }

    fn handle_packet(&mut self, conn_id: EntityId, packet: ClientPacket) {
        match packet {
            ClientPacket::Connect { .. } => {
                warn!("Duplicate connect from already-joined {}", conn_id);
            }
            ClientPacket::Input(sample) => self.world.apply_input(conn_id, sample),
            ClientPacket::TeamSelect { team } => {
                use crate::session::TeamSelectOutcome;
                let outcome = self.world.session.select_team(conn_id, team);
                let accepted = outcome == TeamSelectOutcome::Accepted;
                // Accepted choices are public; rejections stay private.
                let target = if accepted {
                    Target::All
                } else {
                    Target::To(conn_id)
                };
                self.dispatcher.push(
                    SessionEvent::TeamSelectResult {
                        conn_id,
                        team,
                        accepted,
                    },
                    target,
                );
            }
            ClientPacket::SpawnRequest { vehicle_class } => {
                self.handle_spawn_request(conn_id, vehicle_class)
            }
            ClientPacket::Chat { text } => {
                self.dispatcher
                    .push(SessionEvent::Chat { conn_id, text }, Target::AllExcept(conn_id));
            }
            ClientPacket::SetNickname { name } => {
                if self.world.session.set_nickname(conn_id, &name) {
                    self.dispatcher
                        .push(SessionEvent::NicknameChange { conn_id, name }, Target::All);
                }
            }
            ClientPacket::Disconnect => self.handle_leave(conn_id, "quit"),
        }
    }

    fn handle_spawn_request(&mut self, conn_id: EntityId, class: VehicleClass) {
        use crate::session::SpawnOutcome;
        let result = self
            .world
            .spawn_request(conn_id, class, &mut self.rng);

        let (verdict, target) = match result.outcome {
            SpawnOutcome::Spawned => (SpawnVerdict::Spawned, Target::All),
            SpawnOutcome::Queued => (SpawnVerdict::Queued, Target::All),
            SpawnOutcome::NoTeam => (
                SpawnVerdict::Rejected {
                    reason: "no team chosen".to_string(),
                },
                Target::To(conn_id),
            ),
            SpawnOutcome::WrongPhase => (
                SpawnVerdict::Rejected {
                    reason: "not in spawn selection".to_string(),
                },
                Target::To(conn_id),
            ),
            SpawnOutcome::UnknownEntity => return,
        };
        self.dispatcher.push(
            SessionEvent::SpawnResult {
                conn_id,
                vehicle_class: class,
                verdict,
            },
            target,
        );

        if !result.promoted.is_empty() {
            // Match start: queued entities go live, clocks resync.
            for id in result.promoted {
                let class = self
                    .world
                    .session
                    .entity(id)
                    .and_then(|p| p.vehicle.as_ref())
                    .map(|v| v.class)
                    .unwrap_or(class);
                self.dispatcher.push(
                    SessionEvent::SpawnResult {
                        conn_id: id,
                        vehicle_class: class,
                        verdict: SpawnVerdict::Spawned,
                    },
                    Target::All,
                );
            }
            self.dispatcher
                .push(SessionEvent::TimeSync { elapsed_ms: 0 }, Target::All);
            if let Some(vip) = result.vip {
                self.dispatcher
                    .push(SessionEvent::VipDeclared { entity_id: vip }, Target::All);
            }
        }
    }

    /// The single leave path. Explicit quits, timeouts and transport errors
    /// all funnel through here; the session's removal result guards the
    /// broadcast so it fires exactly once per connection.
    fn handle_leave(&mut self, conn_id: EntityId, reason: &str) {
        if !self.world.session.leave(conn_id, reason) {
            return;
        }
        self.replicator.forget(conn_id);
        if let Some(conn) = self.connections.remove(&conn_id) {
            self.addr_index.remove(&conn.addr);
        }
        self.dispatcher.push(
            SessionEvent::Leave {
                conn_id,
                reason: reason.to_string(),
            },
            Target::AllExcept(conn_id),
        );
    }

    /// Advances one server tick: timeouts, collision resolution, scoring.
    fn step_tick(&mut self) {
        self.world.tick += 1;

        for conn_id in self.world.session.timed_out(self.config.connection_timeout) {
            self.handle_leave(conn_id, "timeout");
        }

        let reports = std::mem::take(&mut self.pending_contacts);
        if !reports.is_empty() {
            let resolution = self.resolver.resolve(&reports, &mut self.world, Instant::now());
            for event in &resolution.events {
                debug!(
                    "Entity {} hit {:?} for {:.1} ({:?})",
                    event.entity, event.section, event.damage, event.severity
                );
            }
            if !resolution.deaths.is_empty() {
                for (victim, killer) in &resolution.deaths {
                    self.world.record_kill(*killer);
                    self.dispatcher.push(
                        SessionEvent::Death {
                            victim: *victim,
                            killer: *killer,
                        },
                        Target::All,
                    );
                }
                self.dispatcher.push(
                    SessionEvent::ScoreSync {
                        scores: self.world.score_table(),
                    },
                    Target::All,
                );
            }
        }
    }

    /// Serializes and sends everything produced this tick: snapshots over
    /// the sequenced class, damage updates and events over the reliable
    /// class, plus acks and due retransmissions.
    async fn flush(&mut self) {
        let (snapshots, updates) = self.replicator.tick_outputs(&self.world);
        let events = self.dispatcher.drain();
        let now = Instant::now();
        let mut outbound: Vec<(Vec<u8>, SocketAddr)> = Vec::new();

        for conn in self.connections.values_mut() {
            for (event, target) in &events {
                if target.includes(conn.conn_id) {
                    Self::queue_reliable(conn, &ServerPacket::Event(event.clone()));
                }
            }
            // Per-section damage detail goes to the affected client only;
            // everyone else sees the health change inside the snapshot.
            for update in &updates {
                if update.entity_id == conn.conn_id {
                    Self::queue_reliable(
                        conn,
                        &ServerPacket::Damage {
                            entity_id: update.entity_id,
                            health: update.health,
                            sections: update.sections,
                        },
                    );
                }
            }

            for snapshot in &snapshots {
                let seq = conn.sequenced_out.stamp();
                match encode_body(&ServerPacket::Snapshot(snapshot.clone()))
                    .and_then(|body| encode_datagram(&Datagram::Sequenced { seq, body }))
                {
                    Ok(bytes) => outbound.push((bytes, conn.addr)),
                    Err(e) => error!("Failed to encode snapshot: {}", e),
                }
            }

            for (seq, body) in conn.reliable.frames_to_send(now) {
                match encode_datagram(&Datagram::Reliable { seq, body }) {
                    Ok(bytes) => outbound.push((bytes, conn.addr)),
                    Err(e) => error!("Failed to encode reliable frame: {}", e),
                }
            }
            if let Some(upto) = conn.reliable.take_ack() {
                match encode_datagram(&Datagram::Ack { upto }) {
                    Ok(bytes) => outbound.push((bytes, conn.addr)),
                    Err(e) => error!("Failed to encode ack: {}", e),
                }
            }
        }

        for (bytes, addr) in outbound {
            // A send failure to a departing client is not fatal; the
            // timeout sweep will reap the connection.
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                debug!("Failed to send to {}: {}", addr, e);
            }
        }
    }

    fn queue_reliable(conn: &mut Connection, packet: &ServerPacket) {
        match encode_body(packet) {
            Ok(body) => {
                conn.reliable.push(body);
            }
            Err(e) => error!("Failed to encode packet for {}: {}", conn.conn_id, e),
        }
    }

    /// Best-effort single datagram to a peer we will not keep a connection
    /// for (e.g. a rejected join).
    fn send_oneshot(&self, addr: SocketAddr, packet: &ServerPacket) {
        let bytes = encode_body(packet)
            .and_then(|body| encode_datagram(&Datagram::Sequenced { seq: 0, body }));
        match bytes {
            Ok(bytes) => {
                let socket = Arc::clone(&self.socket);
                tokio::spawn(async move {
                    let _ = socket.send_to(&bytes, addr).await;
                });
            }
            Err(e) => error!("Failed to encode rejection for {}: {}", addr, e),
        }
    }
}
