//! Switchboard - workspace-to-workspace channel bridge.
//!
//! Relays posts, edits, deletions, and threaded replies between paired
//! channels in otherwise-isolated chat workspaces, and brokers ad-hoc
//! DM tunnels between users on opposite sides of a bridge.

mod bridge;
mod common;
mod config;
mod directory;
mod server;
mod slack;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

use bridge::{CorrelationStore, MemoryStore, PgStore};
use common::ConfigError;
use server::App;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Switchboard v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match config::load_from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    for warning in config::validate_config(&config) {
        warn!("{}", warning);
    }

    info!("Configuration loaded");
    info!("  Port: {}", config.port);
    info!("  Workspaces: {}", config.credentials.len());
    info!("  Bridge declarations: {}", config.lines.len());

    // Correlation storage: durable when a database is configured,
    // in-memory otherwise.
    let correlations: Arc<dyn CorrelationStore> = match &config.database_url {
        Some(url) => match PgStore::connect(url).await {
            Ok(store) => {
                info!("Using durable correlation store");
                Arc::new(store)
            }
            Err(e) => {
                let fatal = ConfigError::Database {
                    message: e.to_string(),
                };
                error!("{}", fatal);
                std::process::exit(fatal.exit_code());
            }
        },
        None => {
            info!("Using in-memory correlation store");
            Arc::new(MemoryStore::new())
        }
    };

    let port = config.port;
    let app = Arc::new(App::new(config, correlations));

    // Pre-populate rosters and the IM index for every credential.
    // Failures degrade per workspace; the endpoint still serves.
    for credential in app.config.credentials.clone() {
        if !app.directory.bootstrap(&credential, &app.topology).await {
            warn!("Failed to bootstrap workspace '{}'", credential.workspace);
        }
    }

    tokio::select! {
        result = server::serve(Arc::clone(&app), port) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
