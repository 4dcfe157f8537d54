pub mod antivirus;
pub mod config;
pub mod db;
pub mod deletion;
pub mod error;
pub mod health;
pub mod ingest;
pub mod retention;
pub mod secrets;
pub mod source;

pub use antivirus::{ClamdScanner, ScanAction, ScanGate, ScanReport, Verdict};
pub use config::{SettingsSnapshot, WorkerConfig};
pub use deletion::{delete_messages_by_id, DeleteReport};
pub use error::{MailstashError, Result};
pub use health::{AccountHealth, HealthStatus, SystemHealth};
pub use ingest::{CursorStore, CycleOutcome, Scheduler};
pub use retention::{RetentionSweeper, SweepState};
pub use secrets::{resolve_secret, CredentialVault, SecretError};
pub use source::{
    test_account_connection, AccountSource, Candidate, Cursor, CursorKind, MailSource, SourceError,
};
