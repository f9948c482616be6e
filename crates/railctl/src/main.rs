//! railctl - model railway layout controller, operator console entry point.

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

/// Model railway layout controller
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via RAILCTL_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    railctl_telemetry::init_logging()?;

    info!("Starting railctl v{}", env!("CARGO_PKG_VERSION"));

    let config = railctl::AppConfig::load(args.config)?;
    info!(
        broadcast = %config.link.broadcast_addr,
        ack = %config.link.ack_listen_addr,
        elements = config.layout.element_count(),
        "Configuration loaded"
    );

    let controller = railctl::Controller::start(config).await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        result = railctl::console::run(&controller, stdin, stdout) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
    }

    controller.shutdown().await;
    Ok(())
}
