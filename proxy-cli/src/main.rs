//! DevProxy Binary Entry Point

use clap::Parser;
use devproxy::{
    logging::{init_logging, levels, LoggingConfig},
    run, Args,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !levels::is_valid_level(&args.log_level) {
        anyhow::bail!("Invalid log level: {}", args.log_level);
    }
    init_logging(&LoggingConfig::new(&args.log_level, args.json_logs))?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping proxy server...");
        }
    };

    if let Err(e) = run(args, shutdown).await {
        tracing::error!("Proxy server failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
