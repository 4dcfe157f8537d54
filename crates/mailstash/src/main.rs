//! Mailstash worker daemon: per-account polling, virus scanning, retention.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mailstash::ingest::Scheduler;
use mailstash::retention::RetentionSweeper;
use mailstash::secrets::{CredentialVault, SecretError};
use mailstash::{db, WorkerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting mailstash-worker v{}", env!("CARGO_PKG_VERSION"));

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let db = match db::init_database(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    // A missing master key is survivable: accounts are skipped with a
    // recorded error until the key is configured. A malformed key is not.
    let vault = match CredentialVault::from_env() {
        Ok(vault) => Some(Arc::new(vault)),
        Err(SecretError::KeyMissing(var)) => {
            warn!("{} not set; accounts with encrypted credentials will be skipped", var);
            None
        }
        Err(e) => {
            error!("Invalid master key: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(db.clone(), vault.clone(), config.account_refresh_interval);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let sweeper = RetentionSweeper::new(db.clone(), vault, config.sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    // In-flight cycles finish their current message unit before stopping.
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {:?}", e);
    }
    if let Err(e) = sweeper_handle.await {
        error!("Sweeper task failed: {:?}", e);
    }

    info!("mailstash-worker stopped");
}
