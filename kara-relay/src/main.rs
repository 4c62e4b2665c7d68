//! Karaoke relay (kara-relay) - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kara_common::EventBus;
use kara_relay::api::{self, AppContext};
use kara_relay::{Args, Catalog, Config, Supervisor};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Published events buffered per SSE subscriber
const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args).context("Failed to load configuration")?;

    let default_filter = config
        .log_level
        .clone()
        .unwrap_or_else(|| "kara_relay=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kara-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Songs directory: {}", config.songs_dir.display());
    info!(
        "Engine: {} {:?} in {}",
        config.engine.program,
        config.engine.args,
        config.engine.root.display()
    );

    let catalog = Arc::new(Catalog::load(config.songs_dir.clone()).await);
    let bus = EventBus::new(EVENT_BUS_CAPACITY);
    let supervisor = Supervisor::spawn(&config, Arc::clone(&catalog), bus.clone());

    let router = api::create_router(AppContext {
        supervisor: supervisor.clone(),
        catalog,
        bus,
    });

    api::serve(config.bind_addr, router, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Stopping engine");
    if let Err(e) = supervisor.shutdown().await {
        warn!("Supervisor shutdown: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
