//! Retention sweeper: age-based purge across the archive.
//!
//! Runs on its own schedule, independent of per-account polling. Each sweep
//! walks Idle -> Scanning -> Deleting -> Idle. When deletion from the mail
//! server is configured, remote deletion happens first and local rows are
//! only removed for confirmed remote successes; failures are retried on the
//! next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::RetentionSettings;
use crate::db::stats_repo::DeletionType;
use crate::db::{message_repo, settings_repo, DatabaseError};
use crate::deletion::{self, DeleteReport};
use crate::secrets::CredentialVault;

/// How many messages one sweep handles; the rest waits for the next pass.
const SWEEP_BATCH_SIZE: u64 = 500;

/// Sweeper phase, exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Scanning,
    Deleting,
}

/// Periodic retention sweeper.
pub struct RetentionSweeper {
    db: DatabaseConnection,
    vault: Option<Arc<CredentialVault>>,
    interval: Duration,
    state: SweepState,
}

impl RetentionSweeper {
    pub fn new(
        db: DatabaseConnection,
        vault: Option<Arc<CredentialVault>>,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            interval,
            state: SweepState::Idle,
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Runs sweeps until shutdown. The retention policy is re-read from the
    /// settings table before each sweep, never mid-sweep.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Retention sweeper shutting down");
                        return;
                    }
                }
            }

            let retention = match settings_repo::load_snapshot(&self.db).await {
                Ok(snapshot) => snapshot.retention,
                Err(e) => {
                    error!("Failed to load retention settings: {}", e);
                    continue;
                }
            };

            if !retention.enabled {
                debug!("Retention purge disabled, skipping sweep");
                continue;
            }

            if let Err(e) = self.sweep(&retention).await {
                error!("Retention sweep failed: {}", e);
            }
        }
    }

    /// One full sweep pass under the given policy.
    pub async fn sweep(
        &mut self,
        retention: &RetentionSettings,
    ) -> Result<DeleteReport, DatabaseError> {
        let span = info_span!("retention_sweep");
        async move {
            self.state = SweepState::Scanning;
            let cutoff = Utc::now() - retention.unit.to_duration(retention.value);
            let expired = message_repo::find_older_than(&self.db, cutoff, SWEEP_BATCH_SIZE).await?;

            if expired.is_empty() {
                debug!("No messages past retention cutoff {}", cutoff);
                self.state = SweepState::Idle;
                return Ok(DeleteReport::default());
            }

            info!(
                "{} messages older than {} ({} {:?}), deleting (from_server={})",
                expired.len(),
                cutoff,
                retention.value,
                retention.unit,
                retention.delete_from_mail_server
            );

            self.state = SweepState::Deleting;
            let report = deletion::delete_archived(
                &self.db,
                self.vault.clone(),
                expired,
                retention.delete_from_mail_server,
                DeletionType::Retention,
            )
            .await?;

            self.state = SweepState::Idle;
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
