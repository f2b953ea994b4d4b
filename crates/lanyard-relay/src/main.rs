//! Lanyard relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! lanyard-relay --bind 0.0.0.0:8080
//!
//! # Tighter ceilings for a small deployment
//! lanyard-relay --bind 0.0.0.0:8080 --max-sessions 50 --max-per-ip 4
//! ```

use clap::Parser;
use lanyard_relay::{Relay, RelayConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Blind relay broker for encrypted host/client sessions
#[derive(Parser, Debug)]
#[command(name = "lanyard-relay")]
#[command(about = "Pairs hosts and clients by session id and forwards opaque frames")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Maximum live session registrations
    #[arg(long, default_value = "1000")]
    max_sessions: usize,

    /// Maximum concurrent connections per source address
    #[arg(long, default_value = "10")]
    max_per_ip: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = RelayConfig {
        bind_address: args.bind,
        max_sessions: args.max_sessions,
        max_connections_per_ip: args.max_per_ip,
        ..Default::default()
    };

    let relay = Relay::bind(config).await?;
    relay.run().await?;

    Ok(())
}
