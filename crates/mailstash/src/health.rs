//! Per-account health snapshots for the UI layer.

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::db::account_repo;
use crate::db::entities::fetch_account;
use crate::db::error::Result;

/// Default poll interval assumed when an account has none (seconds).
const DEFAULT_POLL_INTERVAL: i64 = 300;

/// An account counts as stale after this many missed poll intervals.
const HEARTBEAT_MULTIPLIER: i64 = 3;

/// Derived account health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Stale,
    Error,
    /// Never polled yet.
    Pending,
    Disabled,
}

/// Health snapshot for one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub id: i32,
    pub name: String,
    pub account_type: String,
    pub enabled: bool,
    pub status: HealthStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub poll_interval_seconds: i32,
}

/// Derives the status for one account row at `now`.
///
/// Disabled wins; then a recorded error; then staleness (no heartbeat
/// within three poll intervals); a never-polled account is pending.
pub fn derive_status(account: &fetch_account::Model, now: DateTime<Utc>) -> HealthStatus {
    if !account.enabled {
        return HealthStatus::Disabled;
    }

    let Some(heartbeat) = account.last_heartbeat else {
        return HealthStatus::Pending;
    };

    if account.last_error.is_some() {
        return HealthStatus::Error;
    }

    let interval = if account.poll_interval_seconds > 0 {
        account.poll_interval_seconds as i64
    } else {
        DEFAULT_POLL_INTERVAL
    };
    let since_heartbeat = (now - heartbeat).num_seconds();
    if since_heartbeat > interval * HEARTBEAT_MULTIPLIER {
        HealthStatus::Stale
    } else {
        HealthStatus::Healthy
    }
}

/// Health snapshots for every account, ordered by name.
pub async fn snapshot(db: &DatabaseConnection) -> Result<Vec<AccountHealth>> {
    let now = Utc::now();
    let accounts = account_repo::list_all(db).await?;

    Ok(accounts
        .into_iter()
        .map(|account| AccountHealth {
            status: derive_status(&account, now),
            id: account.id,
            name: account.name,
            account_type: account.account_type,
            enabled: account.enabled,
            last_heartbeat: account.last_heartbeat,
            last_success: account.last_success,
            last_error: account.last_error,
            poll_interval_seconds: account.poll_interval_seconds,
        })
        .collect())
}

/// System-wide health rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Error,
    NoAccounts,
}

/// Aggregates account snapshots: any error account makes the system Error,
/// any stale one Degraded; disabled accounts are ignored.
pub fn system_health(accounts: &[AccountHealth]) -> SystemHealth {
    let enabled: Vec<&AccountHealth> = accounts.iter().filter(|a| a.enabled).collect();
    if enabled.is_empty() {
        return SystemHealth::NoAccounts;
    }
    if enabled.iter().any(|a| a.status == HealthStatus::Error) {
        return SystemHealth::Error;
    }
    if enabled.iter().any(|a| a.status == HealthStatus::Stale) {
        return SystemHealth::Degraded;
    }
    SystemHealth::Healthy
}
