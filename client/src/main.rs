use clap::Parser;
use client::input::NullInput;
use client::network::{Client, ClientConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Nickname announced to the session
    #[arg(short = 'n', long, default_value = "driver")]
    nickname: String,

    /// Input upload rate (samples per second)
    #[arg(long, default_value = "30")]
    input_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        server_addr: args.server,
        nickname: args.nickname,
        input_interval: Duration::from_secs_f64(1.0 / args.input_rate as f64),
        ..ClientConfig::default()
    };

    // Headless run: no device polling wired in, so the null source keeps
    // the upload cadence alive while the mirror tracks the session.
    let mut client = Client::new(config, Box::new(NullInput)).await?;
    client.connect().await?;
    info!("Session joined; mirroring state (Ctrl-C to leave)");

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Leaving session");
        }
    }
    client.disconnect().await;
    Ok(())
}
