//! airmac-signaling - relay entry point

use airmac_signaling::args::Args;
use airmac_signaling::web::{run_signaling_server, SignalingHub};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("AIRMAC_LOG").unwrap_or(log_level))
        .init();

    info!("airmac-signaling v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Liveness interval {}s, host prefix {:?}",
        config.liveness.interval_secs, config.signaling.host_id_prefix
    );

    let hub = Arc::new(SignalingHub::new(config)?);

    if let Err(e) = run_signaling_server(hub, shutdown_signal()).await {
        error!("Signaling server error: {}", e);
        return Err(e);
    }

    info!("Signaling server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
