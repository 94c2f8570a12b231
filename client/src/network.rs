//! Client network layer: handshake, input upload, and application of
//! inbound snapshots and events to the local mirror.

use log::{info, warn};
use shared::channel::{ReliableChannel, SequencedChannel};
use shared::protocol::{
    decode_body, decode_datagram, encode_body, encode_datagram, ClientPacket, Datagram,
    ServerPacket, Team, PROTOCOL_VERSION,
};
use shared::vehicle::VehicleClass;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout};

use crate::input::InputSource;
use crate::mirror::Mirror;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub nickname: String,
    /// How often an input sample is taken and uploaded.
    pub input_interval: Duration,
    pub resend_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_addr: "127.0.0.1:8080".to_string(),
            nickname: "driver".to_string(),
            input_interval: Duration::from_millis(33),
            resend_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: ClientConfig,
    reliable: ReliableChannel,
    sequenced_in: SequencedChannel,
    sequenced_out: SequencedChannel,
    mirror: Option<Mirror>,
    input_source: Box<dyn InputSource>,
}

impl Client {
    pub async fn new(
        config: ClientConfig,
        input_source: Box<dyn InputSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server_addr.parse()?;
        let reliable = ReliableChannel::new(config.resend_interval);

        Ok(Client {
            socket,
            server_addr,
            config,
            reliable,
            sequenced_in: SequencedChannel::new(),
            sequenced_out: SequencedChannel::new(),
            mirror: None,
            input_source,
        })
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.mirror.is_some()
    }

    /// Performs the join handshake. The Connect rides the reliable class,
    /// so loss is covered by the normal resend machinery; we just pump the
    /// socket until the accept (or a rejection) arrives.
    pub async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {} ...", self.server_addr);
        self.queue_reliable(&ClientPacket::Connect {
            protocol_version: PROTOCOL_VERSION,
            nickname: self.config.nickname.clone(),
        })?;

        let deadline = Instant::now() + self.config.connect_timeout;
        let mut buffer = [0u8; 2048];
        while self.mirror.is_none() {
            if Instant::now() >= deadline {
                return Err("connection attempt timed out".into());
            }
            self.flush().await;
            if let Ok(Ok((len, _))) = timeout(
                self.config.resend_interval,
                self.socket.recv_from(&mut buffer),
            )
            .await
            {
                self.handle_datagram(&buffer[..len])?;
            }
        }
        Ok(())
    }

    /// Main loop: applies inbound state, uploads one input sample per
    /// client tick, and flushes acks and reliable retransmissions.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut input_interval = interval(self.config.input_interval);
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => self.handle_datagram(&buffer[..len])?,
                        Err(e) => warn!("Error receiving datagram: {}", e),
                    }
                },
                _ = input_interval.tick() => {
                    self.send_input().await;
                    self.flush().await;
                },
            }
        }
    }

    fn handle_datagram(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        let datagram = match decode_datagram(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Malformed datagram from server: {}", e);
                return Ok(());
            }
        };

        match datagram {
            Datagram::Sequenced { seq, body } => {
                if !self.sequenced_in.accept(seq) {
                    return Ok(());
                }
                match decode_body::<ServerPacket>(&body) {
                    Ok(packet) => self.handle_packet(packet)?,
                    Err(e) => warn!("Malformed sequenced body: {}", e),
                }
            }
            Datagram::Reliable { seq, body } => {
                for body in self.reliable.on_frame(seq, body) {
                    match decode_body::<ServerPacket>(&body) {
                        Ok(packet) => self.handle_packet(packet)?,
                        Err(e) => warn!("Malformed reliable body: {}", e),
                    }
                }
            }
            Datagram::Ack { upto } => self.reliable.on_ack(upto),
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: ServerPacket) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            ServerPacket::ConnectAccepted {
                conn_id,
                max_health,
                roster,
            } => {
                info!("Connected as entity {}", conn_id);
                self.mirror = Some(Mirror::new(conn_id, max_health, roster));
            }
            ServerPacket::ConnectRejected { reason } => {
                return Err(format!("join rejected: {}", reason).into());
            }
            ServerPacket::Snapshot(snapshot) => {
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.apply_snapshot(&snapshot);
                }
            }
            ServerPacket::Damage {
                entity_id,
                health,
                sections,
            } => {
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.apply_damage(entity_id, health, sections);
                }
            }
            ServerPacket::Event(event) => {
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.apply_event(event);
                }
            }
        }
        Ok(())
    }

    async fn send_input(&mut self) {
        if self.mirror.is_none() {
            return;
        }
        let sample = self.input_source.sample();
        let seq = self.sequenced_out.stamp();
        match encode_body(&ClientPacket::Input(sample))
            .and_then(|body| encode_datagram(&Datagram::Sequenced { seq, body }))
        {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                    warn!("Failed to send input: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode input: {}", e),
        }
    }

    /// Sends due reliable frames and any owed ack.
    async fn flush(&mut self) {
        let now = Instant::now();
        let mut outbound = Vec::new();
        for (seq, body) in self.reliable.frames_to_send(now) {
            if let Ok(bytes) = encode_datagram(&Datagram::Reliable { seq, body }) {
                outbound.push(bytes);
            }
        }
        if let Some(upto) = self.reliable.take_ack() {
            if let Ok(bytes) = encode_datagram(&Datagram::Ack { upto }) {
                outbound.push(bytes);
            }
        }
        for bytes in outbound {
            if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                warn!("Failed to send: {}", e);
                break;
            }
        }
    }

    fn queue_reliable(&mut self, packet: &ClientPacket) -> Result<(), Box<dyn std::error::Error>> {
        let body = encode_body(packet)?;
        self.reliable.push(body);
        Ok(())
    }

    pub fn request_team(&mut self, team: Team) -> Result<(), Box<dyn std::error::Error>> {
        self.queue_reliable(&ClientPacket::TeamSelect { team })
    }

    pub fn request_spawn(
        &mut self,
        vehicle_class: VehicleClass,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.queue_reliable(&ClientPacket::SpawnRequest { vehicle_class })
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.queue_reliable(&ClientPacket::Chat {
            text: text.to_string(),
        })
    }

    pub fn set_nickname(&mut self, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.queue_reliable(&ClientPacket::SetNickname {
            name: name.to_string(),
        })
    }

    /// Announces departure and pushes out whatever is still queued. The
    /// server also reaps us by timeout if this final flush is lost.
    pub async fn disconnect(&mut self) {
        if self.queue_reliable(&ClientPacket::Disconnect).is_ok() {
            self.flush().await;
        }
        self.mirror = None;
    }
}
