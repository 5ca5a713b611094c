//! Kestrel - a Kafka-wire-compatible streaming broker
//!
//! Binary entry point: parses CLI flags, loads configuration, wires up the
//! broker's components (log storage, replication, metadata plane,
//! coordinator, background cleaner), and drives it until a shutdown signal
//! arrives.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use clap::{Parser, Subcommand};
use tracing::info;
use anyhow::Result;

mod config;
mod server;

use server::Broker;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, about = "Kestrel - a Kafka-wire-compatible streaming broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker
    Server {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/kestrel/kestrel.toml")]
        config: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kestrel=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            info!("Starting Kestrel broker...");

            let config = config::load(&config).await?;
            let broker = Broker::new(config).await?;

            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
            };

            tokio::select! {
                result = broker.run() => result?,
                _ = shutdown => {
                    broker.shutdown().await?;
                }
            }
        }

        Commands::Version => {
            println!("kestrel {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
