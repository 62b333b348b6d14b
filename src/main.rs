//! Custody bridge - encrypted secret export and session handshake

use clap::Parser;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use custody_bridge::{config::Args, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("custody_bridge={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Custody Bridge");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Public URL: {}", args.url);
    info!("Custody counterpart: {}", args.custody_url);
    info!("Backend: {} ({})", args.handler, args.storage_root.display());
    info!("Credential store: {}", args.secure_store_path.display());
    info!("Export concurrency: {}", args.export_concurrency);
    info!("======================================");

    let state = match server::AppState::new(args).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(Notify::new());
    let mut server_task = tokio::spawn(server::run(Arc::clone(&state), Arc::clone(&shutdown)));

    let stopped_early = tokio::select! {
        _ = wait_for_signal() => false,
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task failed: {}", e),
            }
            true
        }
    };
    if stopped_early {
        std::process::exit(1);
    }

    info!("Shutdown signal received");
    shutdown.notify_one();
    state.health.notify_shutdown().await;
    if let Err(e) = server_task.await {
        error!("Server task failed: {}", e);
    }

    info!("Custody bridge stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
