//! bridge-proxy: forward proxy, bridge agent and bridge service in one binary.

use clap::Parser;
use std::path::PathBuf;

use bridge_proxy::config::load_config;
use bridge_proxy::lifecycle::signals::wait_for_signal;
use bridge_proxy::observability::{logging, metrics};
use bridge_proxy::ProxyRuntime;

#[derive(Parser)]
#[command(name = "bridge-proxy")]
#[command(about = "Forward HTTP proxy with remote bridge egress", long_about = None)]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, default_value = "bridge-proxy.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    if args.check {
        println!(
            "{}: ok ({} modules)",
            args.config.display(),
            config.module_count()
        );
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        modules = config.module_count(),
        "bridge-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    if config.module_count() == 0 {
        tracing::warn!("No modules configured; nothing to serve");
    }

    let mut runtime = ProxyRuntime::from_config(&config);
    runtime.start().await?;

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown signal received");

    runtime.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
