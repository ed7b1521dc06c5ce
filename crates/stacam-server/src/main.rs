use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stacam::{load_config, Config, DetectionService};
use stacam_server::{logging, serve, AppState};
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Config file path; defaults apply when omitted
    #[arg(short, long, env = "STACAM_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_json)?;

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    debug!("config : {:?}", config);
    info!("Starting stacam-server v{}", env!("CARGO_PKG_VERSION"));

    let service = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || DetectionService::from_config(&config)).await??
    };
    let service = Arc::new(service);

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;

    serve(
        AppState::new(Arc::clone(&service), &config),
        listener,
        shutdown_signal(),
    )
    .await;

    info!("HTTP server stopped, draining workers");
    tokio::task::spawn_blocking(move || service.shutdown()).await?;
    info!("Server shutdown");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("Received Ctrl-C"),
        Err(e) => {
            tracing::error!("Could not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await
        }
    }
}
