//! Per-account polling scheduler.
//!
//! One tokio task per enabled account, each on its own timer, so a slow
//! cycle on one account never delays another. Within an account, cycles are
//! strictly serialized: a long cycle delays its own next tick instead of
//! overlapping it. The scheduler periodically reconciles the task set
//! against the accounts table so accounts created or disabled through the
//! UI are picked up without a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::POLL_INTERVAL_FALLBACK;
use crate::db::{account_repo, settings_repo};
use crate::ingest::pipeline;
use crate::secrets::CredentialVault;

/// Scheduler owning the per-account polling tasks.
pub struct Scheduler {
    db: DatabaseConnection,
    vault: Option<Arc<CredentialVault>>,
    /// How often the account set is reconciled against the database.
    refresh_interval: Duration,
}

impl Scheduler {
    pub fn new(
        db: DatabaseConnection,
        vault: Option<Arc<CredentialVault>>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            refresh_interval,
        }
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight account
    /// tasks to finish their current message unit.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks: HashMap<i32, JoinHandle<()>> = HashMap::new();

        loop {
            tasks.retain(|_, handle| !handle.is_finished());

            match account_repo::list_enabled(&self.db).await {
                Ok(accounts) => {
                    for account in accounts {
                        if !tasks.contains_key(&account.id) {
                            info!(
                                "Starting polling task for account '{}' (every {}s)",
                                account.name,
                                effective_poll_interval(account.poll_interval_seconds)
                            );
                            let handle = tokio::spawn(account_loop(
                                self.db.clone(),
                                self.vault.clone(),
                                account.id,
                                shutdown.clone(),
                            ));
                            tasks.insert(account.id, handle);
                        }
                    }
                }
                Err(e) => error!("Failed to load accounts: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler shutting down, waiting for account tasks");
        for (id, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Account task {} panicked: {:?}", id, e);
            }
        }
        info!("All account tasks stopped");
    }
}

/// Polling loop for one account. Exits when the account disappears, is
/// disabled, or shutdown is requested.
async fn account_loop(
    db: DatabaseConnection,
    vault: Option<Arc<CredentialVault>>,
    account_id: i32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut poll_seconds = 0u64;
    // Placeholder until the first account row is loaded.
    let mut ticker = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_FALLBACK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Account task {} stopping on shutdown", account_id);
                    return;
                }
            }
        }

        // Re-read the row every tick: UI edits (credentials, interval,
        // enabled flag) take effect on the next cycle.
        let account = match account_repo::find(&db, account_id).await {
            Ok(Some(account)) if account.enabled => account,
            Ok(_) => {
                info!("Account {} removed or disabled, stopping its task", account_id);
                return;
            }
            Err(e) => {
                error!("Failed to reload account {}: {}", account_id, e);
                continue;
            }
        };

        let configured = effective_poll_interval(account.poll_interval_seconds);
        if configured != poll_seconds {
            poll_seconds = configured;
            let mut next = tokio::time::interval(Duration::from_secs(configured));
            next.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The fresh interval fires immediately; consume that tick so the
            // cadence change does not double-run the cycle.
            next.tick().await;
            ticker = next;
        }

        // One settings snapshot per tick; never re-read mid-cycle.
        let snapshot = match settings_repo::load_snapshot(&db).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to load settings for account {}: {}", account_id, e);
                continue;
            }
        };

        pipeline::process_account(
            &db,
            vault.as_deref(),
            &snapshot,
            &account,
            Some(shutdown.clone()),
        )
        .await;

        if *shutdown.borrow() {
            return;
        }
    }
}

fn effective_poll_interval(configured: i32) -> u64 {
    if configured > 0 {
        configured as u64
    } else {
        POLL_INTERVAL_FALLBACK
    }
}
