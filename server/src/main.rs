use clap::Parser;
use log::error;
use server::collision::CollisionConfig;
use server::network::{Server, ServerConfig};
use shared::protocol::GameMode;
use std::time::Duration;

/// Authoritative server for the vehicle-combat session.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Maximum number of concurrent players
    #[clap(long, default_value = "16")]
    max_players: usize,
    /// Players required before the match starts
    #[clap(long, default_value = "2")]
    min_players: usize,
    /// Collision cooldown window in milliseconds
    #[clap(long, default_value = "400")]
    collision_cooldown_ms: u64,
    /// Arena label announced to joining clients
    #[clap(long, default_value = "junkyard")]
    arena: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        tick_duration: Duration::from_secs_f64(1.0 / args.tick_rate as f64),
        max_players: args.max_players,
        min_players: args.min_players,
        mode: GameMode::TeamBattle,
        arena: args.arena,
        collision: CollisionConfig {
            cooldown: Duration::from_millis(args.collision_cooldown_ms),
            ..CollisionConfig::default()
        },
        ..ServerConfig::default()
    };

    let mut server = Server::new(config).await?;
    if let Err(e) = server.run().await {
        error!("Server terminated with error: {}", e);
        return Err(e);
    }
    Ok(())
}
