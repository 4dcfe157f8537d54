//! Per-account ingestion cycle.
//!
//! One cycle: heartbeat, open the source adapter, then per folder walk the
//! new messages behind the cursor through fetch → scan gate → idempotent
//! store → cursor advance. Message-level failures skip one message and hold
//! the cursor back so it is retried next cycle; connection-level failures
//! abort the cycle and surface as the account's last_error.

use mail_parser::MessageParser;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::antivirus::{ClamdScanner, ScanAction, ScanGate, Verdict};
use crate::config::SettingsSnapshot;
use crate::db::entities::fetch_account;
use crate::db::{account_repo, log_repo, message_repo};
use crate::ingest::cursor::CursorStore;
use crate::secrets::CredentialVault;
use crate::source::{AccountSource, Candidate, Cursor, CursorKind, MailSource, SourceError};

/// What happened to one candidate message.
enum StoreResult {
    Stored,
    AlreadyArchived,
    /// Infected under action=reject: not stored, not retried.
    Rejected,
}

/// Tally for one account cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub stored: usize,
    pub already_archived: usize,
    pub rejected: usize,
    pub message_errors: usize,
    pub folders_skipped: usize,
    /// The scan daemon was unreachable at least once; messages were stored
    /// unscanned.
    pub scan_unavailable: bool,
}

impl CycleOutcome {
    pub fn processed(&self) -> usize {
        self.stored + self.already_archived + self.rejected
    }
}

/// Runs a full cycle for one account with health bracketing: heartbeat at
/// start, last_success/last_error at the end. Never panics the scheduler;
/// every failure is recorded against the account.
pub async fn process_account(
    db: &DatabaseConnection,
    vault: Option<&CredentialVault>,
    snapshot: &SettingsSnapshot,
    account: &fetch_account::Model,
    shutdown: Option<watch::Receiver<bool>>,
) {
    let span = info_span!("account_cycle", account = %account.name);
    async move {
        let source_label = format!("source:{}", account.name);

        if let Err(e) = account_repo::update_heartbeat(db, account.id).await {
            error!("Failed to update heartbeat for '{}': {}", account.name, e);
            return;
        }

        let Some(vault) = vault else {
            let message = "No encryption key configured; account skipped".to_string();
            record_account_error(db, account, &source_label, &message).await;
            return;
        };

        let mut source = match AccountSource::open(db, vault, account).await {
            Ok(source) => source,
            Err(e) => {
                let message = format!("Cannot open account '{}': {}", account.name, e);
                record_account_error(db, account, &source_label, &message).await;
                return;
            }
        };

        let scanner = snapshot
            .scan
            .enabled
            .then(|| ClamdScanner::new(snapshot.scan.host.clone(), snapshot.scan.port));
        let gate = scanner.as_ref().map(|s| s as &dyn ScanGate);

        run_and_record(db, account, &mut source, gate, snapshot.scan.action, shutdown).await;
    }
    .instrument(span)
    .await
}

/// Runs a cycle against an already-open source and records the outcome on
/// the account's health fields. Public so callers with their own adapters
/// (and tests) get identical bookkeeping.
pub async fn run_and_record(
    db: &DatabaseConnection,
    account: &fetch_account::Model,
    source: &mut dyn MailSource,
    gate: Option<&dyn ScanGate>,
    action: ScanAction,
    shutdown: Option<watch::Receiver<bool>>,
) {
    let source_label = format!("source:{}", account.name);
    let result = run_cycle(db, account, source, gate, action, shutdown).await;

    match result {
        Ok(outcome) => {
            if outcome.scan_unavailable {
                warn!("Virus scanner unavailable during cycle for '{}'", account.name);
                let _ = log_repo::append(
                    db,
                    "warning",
                    &source_label,
                    "Virus scanner unavailable, messages stored unscanned",
                    "",
                )
                .await;
            }
            info!(
                "Cycle for '{}' done: {} stored, {} already archived, {} rejected, {} errors",
                account.name,
                outcome.stored,
                outcome.already_archived,
                outcome.rejected,
                outcome.message_errors
            );
            if let Err(e) = account_repo::update_success(db, account.id).await {
                error!("Failed to update last_success for '{}': {}", account.name, e);
            }
        }
        Err(e) => {
            let message = format!("Cycle failed for account '{}': {}", account.name, e);
            record_account_error(db, account, &source_label, &message).await;
        }
    }
}

async fn record_account_error(
    db: &DatabaseConnection,
    account: &fetch_account::Model,
    source_label: &str,
    message: &str,
) {
    error!("{}", message);
    if let Err(e) = log_repo::append(db, "error", source_label, message, "").await {
        error!("Failed to append to system log: {}", e);
    }
    if let Err(e) = account_repo::update_error(db, account.id, message).await {
        error!("Failed to update last_error for '{}': {}", account.name, e);
    }
}

/// Runs the folder walk for one account against an already-open source.
/// Public with a trait-object source so tests can inject adapters.
pub async fn run_cycle(
    db: &DatabaseConnection,
    account: &fetch_account::Model,
    source: &mut dyn MailSource,
    gate: Option<&dyn ScanGate>,
    action: ScanAction,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<CycleOutcome, SourceError> {
    let mut outcome = CycleOutcome::default();
    let cursors = CursorStore::new(db.clone());

    let folders = source.folders().await?;
    debug!("Polling {} folders for '{}'", folders.len(), account.name);

    for folder in &folders {
        if shutdown_requested(&shutdown) {
            break;
        }
        match ingest_folder(
            db,
            account,
            source,
            gate,
            action,
            &cursors,
            folder,
            &shutdown,
            &mut outcome,
        )
        .await
        {
            Ok(()) => {}
            Err(SourceError::FolderNotFound(name)) => {
                // Missing folder skips just that folder; the account's other
                // folders still ingest.
                warn!("Folder '{}' not found for '{}', skipping", name, account.name);
                let _ = log_repo::append(
                    db,
                    "warning",
                    &format!("source:{}", account.name),
                    &format!("Folder '{}' not found, skipped", name),
                    "",
                )
                .await;
                outcome.folders_skipped += 1;
            }
            Err(e) => {
                let _ = source.close().await;
                return Err(e);
            }
        }
    }

    let _ = source.close().await;
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn ingest_folder(
    db: &DatabaseConnection,
    account: &fetch_account::Model,
    source: &mut dyn MailSource,
    gate: Option<&dyn ScanGate>,
    action: ScanAction,
    cursors: &CursorStore,
    folder: &str,
    shutdown: &Option<watch::Receiver<bool>>,
    outcome: &mut CycleOutcome,
) -> Result<(), SourceError> {
    let kind = source.cursor_kind();
    let cursor = cursors
        .get(account.id, folder, kind)
        .await
        .map_err(storage_error)?;

    let candidates = source.list_new(folder, &cursor).await?;
    if !candidates.is_empty() {
        info!(
            "{} new messages in '{}' for account '{}'",
            candidates.len(),
            folder,
            account.name
        );
    }

    // The UID cursor may only advance while every earlier message in the
    // batch has been stored or explicitly skipped; one failure freezes it so
    // the failed message is retried next cycle.
    let mut cursor_may_advance = true;
    let mut batch_complete = true;
    let mut removable: Vec<Candidate> = Vec::new();

    for candidate in &candidates {
        if shutdown_requested(shutdown) {
            batch_complete = false;
            break;
        }

        match ingest_message(db, account, source, gate, action, folder, candidate, outcome).await {
            Ok(result) => {
                match result {
                    StoreResult::Stored => outcome.stored += 1,
                    StoreResult::AlreadyArchived => outcome.already_archived += 1,
                    StoreResult::Rejected => outcome.rejected += 1,
                }
                if !matches!(result, StoreResult::Rejected) {
                    removable.push(candidate.clone());
                }
                if cursor_may_advance && kind == CursorKind::Uid {
                    cursors
                        .advance_uid(account.id, folder, candidate.uid)
                        .await
                        .map_err(storage_error)?;
                }
            }
            Err(e) if e.is_message_level() => {
                outcome.message_errors += 1;
                cursor_may_advance = false;
                batch_complete = false;
                warn!(
                    "Skipping message {} in '{}' for '{}': {}",
                    candidate.provider_id, folder, account.name, e
                );
                let _ = log_repo::append(
                    db,
                    "error",
                    &format!("source:{}", account.name),
                    &format!("Failed to ingest message {}: {}", candidate.provider_id, e),
                    "",
                )
                .await;
            }
            Err(e) => return Err(e),
        }
    }

    // Sync tokens advance once per batch, and only when nothing failed:
    // a partial delta batch is re-fetched next cycle and deduplicated.
    if kind == CursorKind::Token && batch_complete {
        if let Some(Cursor::Token(Some(token))) = source.next_cursor(folder).await? {
            cursors
                .advance_token(account.id, folder, &token)
                .await
                .map_err(storage_error)?;
        }
    }

    // Origin cleanup only after the whole batch succeeded, so a retried
    // cycle can still find its messages.
    if account.delete_after_processing && batch_complete && !removable.is_empty() {
        delete_processed(account, source, folder, &removable).await;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn ingest_message(
    db: &DatabaseConnection,
    account: &fetch_account::Model,
    source: &mut dyn MailSource,
    gate: Option<&dyn ScanGate>,
    action: ScanAction,
    folder: &str,
    candidate: &Candidate,
    outcome: &mut CycleOutcome,
) -> Result<StoreResult, SourceError> {
    let raw = source.fetch_raw(folder, candidate).await?;

    let report = match gate {
        Some(gate) => Some(gate.scan(&raw).await),
        None => None,
    };

    if let Some(report) = &report {
        match &report.verdict {
            Verdict::Infected(name) => {
                warn!(
                    "Virus '{}' detected in message {} from '{}'",
                    name, candidate.provider_id, account.name
                );
                let _ = log_repo::append(
                    db,
                    "warning",
                    &format!("source:{}", account.name),
                    &format!(
                        "Virus '{}' detected in message {} ({:?})",
                        name, candidate.provider_id, action
                    ),
                    "",
                )
                .await;
            }
            Verdict::Unavailable => outcome.scan_unavailable = true,
            Verdict::Clean => {}
        }

        if !action.should_store(&report.verdict) {
            debug!(
                "Rejecting infected message {} from '{}'",
                candidate.provider_id, account.name
            );
            return Ok(StoreResult::Rejected);
        }
    }

    let headers = extract_headers(&raw);
    let message = message_repo::NewMessage {
        account_name: account.name.clone(),
        folder: folder.to_string(),
        uid: candidate.uid,
        provider_id: Some(candidate.provider_id.clone()),
        subject: headers.subject,
        sender: headers.sender,
        recipients: headers.recipients,
        date: headers.date,
        raw,
        virus_scanned: report.as_ref().is_some_and(|r| r.scanned()),
        virus_detected: report.as_ref().is_some_and(|r| r.detected()),
        virus_name: report
            .as_ref()
            .and_then(|r| r.virus_name().map(str::to_string)),
        scan_timestamp: report.as_ref().filter(|r| r.scanned()).map(|r| r.timestamp),
    };

    let inserted = message_repo::insert(db, message)
        .await
        .map_err(|e| SourceError::Message {
            id: candidate.provider_id.clone(),
            reason: format!("storage failed: {}", e),
        })?;

    if inserted {
        Ok(StoreResult::Stored)
    } else {
        debug!(
            "Message {} in '{}' already archived",
            candidate.provider_id, folder
        );
        Ok(StoreResult::AlreadyArchived)
    }
}

/// Removes fully-processed messages from the origin server. Failures are
/// logged and ignored: the archive copy is already durable and dedupe makes
/// a later re-fetch harmless.
async fn delete_processed(
    account: &fetch_account::Model,
    source: &mut dyn MailSource,
    folder: &str,
    removable: &[Candidate],
) {
    info!(
        "Removing {} processed messages from '{}' on '{}'",
        removable.len(),
        folder,
        account.name
    );

    for (index, candidate) in removable.iter().enumerate() {
        // IMAP expunges once, after the last flagged message.
        let expunge = account.expunge_deleted && index == removable.len() - 1;
        if let Err(e) = source.delete_or_trash(folder, candidate, expunge).await {
            warn!(
                "Failed to remove message {} from origin '{}': {}",
                candidate.provider_id, account.name, e
            );
        }
    }
}

/// Denormalized header fields for search and filtering.
#[derive(Debug, Default)]
struct MessageHeaders {
    subject: Option<String>,
    sender: Option<String>,
    recipients: Option<String>,
    date: Option<String>,
}

/// Extracts header fields from raw RFC822 bytes. An unparseable message
/// still archives, just without denormalized headers.
fn extract_headers(raw: &[u8]) -> MessageHeaders {
    let Some(message) = MessageParser::default().parse(raw) else {
        debug!("Message could not be parsed; storing without header fields");
        return MessageHeaders::default();
    };

    let mut recipients: Vec<String> = Vec::new();
    for address in [message.to(), message.cc(), message.bcc()]
        .into_iter()
        .flatten()
    {
        recipients.extend(collect_addrs(address).into_iter().map(format_address));
    }

    MessageHeaders {
        subject: message.subject().map(|s| s.to_string()),
        sender: message
            .from()
            .and_then(|addr| addr.first().map(format_address)),
        recipients: if recipients.is_empty() {
            None
        } else {
            Some(recipients.join(", "))
        },
        date: message.date().map(|d| d.to_rfc3339()),
    }
}

fn collect_addrs<'a>(address: &'a mail_parser::Address<'a>) -> Vec<&'a mail_parser::Addr<'a>> {
    match address {
        mail_parser::Address::List(list) => list.iter().collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .collect(),
    }
}

fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}

fn storage_error(e: crate::db::DatabaseError) -> SourceError {
    SourceError::Protocol(format!("storage layer failure: {}", e))
}

fn shutdown_requested(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().is_some_and(|rx| *rx.borrow())
}
