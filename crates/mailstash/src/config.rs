//! Worker configuration and runtime settings snapshots.
//!
//! Static configuration (database DSN, encryption key) comes from the
//! environment. Tunable behavior (virus-scan policy, retention policy) lives
//! in the `settings` table and is read once per scheduler tick into an
//! immutable [`SettingsSnapshot`], so a cycle never observes a half-updated
//! configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::antivirus::ScanAction;

/// Database DSN environment variables, checked in order.
pub const DATABASE_URL_ENV_VARS: [&str; 2] = ["MAILSTASH_DATABASE_URL", "DATABASE_URL"];

/// Fallback poll interval when an account has none configured (seconds).
pub const POLL_INTERVAL_FALLBACK: u64 = 300;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Database DSN not configured (set {0} or {1})")]
    DatabaseUrlMissing(&'static str, &'static str),

    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Static worker configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SeaORM connection string (postgres://… in production).
    pub database_url: String,
    /// How often the retention sweeper runs.
    pub sweep_interval: Duration,
    /// How often the scheduler reconciles the account set against the DB.
    pub account_refresh_interval: Duration,
}

impl WorkerConfig {
    /// Loads configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = DATABASE_URL_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .ok_or(ConfigError::DatabaseUrlMissing(
                DATABASE_URL_ENV_VARS[0],
                DATABASE_URL_ENV_VARS[1],
            ))?;

        let sweep_interval = env_seconds("MAILSTASH_SWEEP_INTERVAL", 3600);
        let account_refresh_interval = env_seconds("MAILSTASH_ACCOUNT_REFRESH_INTERVAL", 300);

        Ok(Self {
            database_url,
            sweep_interval,
            account_refresh_interval,
        })
    }
}

fn env_seconds(var: &str, default: u64) -> Duration {
    let secs = std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Virus-scan settings, one snapshot per scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub action: ScanAction,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "clamav".to_string(),
            port: 3310,
            action: ScanAction::Quarantine,
        }
    }
}

/// Retention unit for the purge cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionUnit {
    Days,
    Months,
    Years,
}

impl RetentionUnit {
    /// Approximate duration of `value` units (months = 30 days, years = 365).
    pub fn to_duration(self, value: u32) -> chrono::Duration {
        let days = match self {
            RetentionUnit::Days => value as i64,
            RetentionUnit::Months => value as i64 * 30,
            RetentionUnit::Years => value as i64 * 365,
        };
        chrono::Duration::days(days)
    }
}

/// Retention settings, one snapshot per sweeper tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub enabled: bool,
    pub value: u32,
    pub unit: RetentionUnit,
    pub delete_from_mail_server: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            value: 1,
            unit: RetentionUnit::Years,
            delete_from_mail_server: false,
        }
    }
}

/// Immutable view of the `settings` table taken once per tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSnapshot {
    pub scan: ScanSettings,
    pub retention: RetentionSettings,
}

impl SettingsSnapshot {
    /// Builds a snapshot from raw key/value settings rows. Unknown keys are
    /// ignored; malformed values fall back to their defaults.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let scan = ScanSettings {
            enabled: parse_bool(map.get("clamav_enabled"), true),
            host: map
                .get("clamav_host")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| "clamav".to_string()),
            port: map
                .get("clamav_port")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(3310),
            action: map
                .get("clamav_action")
                .and_then(|v| ScanAction::parse(v))
                .unwrap_or(ScanAction::Quarantine),
        };

        let retention = RetentionSettings {
            enabled: parse_bool(map.get("enable_purge"), false),
            value: map
                .get("retention_value")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(1),
            unit: match map.get("retention_unit").map(|s| s.as_str()) {
                Some("days") => RetentionUnit::Days,
                Some("months") => RetentionUnit::Months,
                _ => RetentionUnit::Years,
            },
            delete_from_mail_server: parse_bool(map.get("retention_delete_from_mail_server"), false),
        };

        Self { scan, retention }
    }
}

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value {
        Some(v) => v.trim().eq_ignore_ascii_case("true"),
        None => default,
    }
}
