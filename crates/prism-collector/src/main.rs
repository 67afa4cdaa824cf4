//! prism collector entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Multi-exchange market-data collector
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PRISM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Keep events in memory instead of publishing to NATS
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection
    prism_ws::init_crypto();

    let args = Args::parse();

    prism_telemetry::init_logging()?;

    info!("Starting prism collector v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PRISM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PRISM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = prism_collector::AppConfig::from_file(&config_path)?;
    info!(
        feeds = config.feeds.len(),
        bus = %config.bus.url,
        "Configuration loaded"
    );

    let app = prism_collector::Application::new(config)?;
    app.run(args.dry_run).await?;

    Ok(())
}
