//! Bridge Host
//!
//! Runs a demo session between a native and a script transceiver.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bridge_host::config::{HostConfig, LoggingConfig};
use bridge_host::session;

/// Cross-runtime message bridge host
#[derive(Parser, Debug)]
#[command(name = "bridge-host")]
#[command(about = "Cross-runtime message bridge demo host", long_about = None)]
struct Args {
    /// Path to bridge.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Override the number of events queued before the handshake
    #[arg(long)]
    ticks: Option<u32>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(logging: &LoggingConfig, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if json || logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HostConfig::load_or_default(args.config.as_deref()).await?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.bridge.request_timeout_ms = timeout_ms;
    }
    if let Some(ticks) = args.ticks {
        config.demo.ticks = ticks;
    }

    init_tracing(&config.logging, args.log_json);
    info!("Starting bridge host v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Using config: {}", path.display());
    }

    match session::run(&config).await {
        Ok(report) => {
            info!("Session complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!("Session failed: {}", e);
            Err(e.into())
        }
    }
}
