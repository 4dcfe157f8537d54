//! Archive deletion machinery shared by the retention sweeper and the
//! manual deletion surface.
//!
//! When deletion from the mail server is requested, the remote copy is
//! removed first and the local row only afterwards: a failed remote call
//! must never leave the archive copy already gone.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

use crate::db::entities::archived_message;
use crate::db::stats_repo::{self, DeletionType};
use crate::db::{account_repo, log_repo, message_repo, DatabaseError};
use crate::secrets::CredentialVault;
use crate::source::{AccountSource, Candidate, MailSource, SourceError};

/// A connected adapter ready for remote deletion.
pub type OpenedSource = Box<dyn MailSource + Send>;

/// Opens the adapter for an account. The production opener decrypts
/// credentials through the vault; tests substitute scripted adapters.
pub type SourceOpener =
    Box<dyn FnMut(crate::db::entities::fetch_account::Model) -> BoxFuture<'static, std::result::Result<OpenedSource, SourceError>> + Send>;

/// Result of one deletion pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// Rows removed from the archive.
    pub deleted_local: u64,
    /// Messages removed from their origin server.
    pub deleted_remote: usize,
    /// Remote deletions that failed; their archive rows were kept.
    pub failed_remote: usize,
    /// Messages whose fetch account no longer exists or could not be
    /// opened; archive rows kept.
    pub skipped_no_account: usize,
}

/// Deletes the given archived messages, optionally from the origin server
/// first, and records the aggregate statistics.
pub async fn delete_archived(
    db: &DatabaseConnection,
    vault: Option<Arc<CredentialVault>>,
    messages: Vec<archived_message::Model>,
    from_server: bool,
    deletion_type: DeletionType,
) -> Result<DeleteReport, DatabaseError> {
    let opener = production_opener(db.clone(), vault);
    delete_archived_with(db, messages, from_server, deletion_type, opener).await
}

/// Loads messages by id and deletes them (manual deletion surface; bypasses
/// cursor logic entirely).
pub async fn delete_messages_by_id(
    db: &DatabaseConnection,
    vault: Option<Arc<CredentialVault>>,
    ids: &[i64],
    from_server: bool,
) -> Result<DeleteReport, DatabaseError> {
    let mut messages = Vec::new();
    for &id in ids {
        if let Some(message) = message_repo::find(db, id).await? {
            messages.push(message);
        }
    }

    delete_archived(db, vault, messages, from_server, DeletionType::Manual).await
}

/// Deletion pass with an injectable adapter opener.
pub async fn delete_archived_with(
    db: &DatabaseConnection,
    messages: Vec<archived_message::Model>,
    from_server: bool,
    deletion_type: DeletionType,
    opener: SourceOpener,
) -> Result<DeleteReport, DatabaseError> {
    let mut report = DeleteReport::default();
    if messages.is_empty() {
        return Ok(report);
    }

    let removable_ids = if from_server {
        delete_from_origin(db, &messages, &mut report, opener).await
    } else {
        messages.iter().map(|m| m.id).collect()
    };

    report.deleted_local = message_repo::delete_by_ids(db, &removable_ids).await?;

    stats_repo::record_deletion(
        db,
        Utc::now().date_naive(),
        deletion_type,
        from_server,
        report.deleted_local,
    )
    .await?;

    info!(
        "Deleted {} archived messages ({:?}, from_server={}), {} remote failures",
        report.deleted_local, deletion_type, from_server, report.failed_remote
    );

    Ok(report)
}

fn production_opener(db: DatabaseConnection, vault: Option<Arc<CredentialVault>>) -> SourceOpener {
    Box::new(move |account| {
        let db = db.clone();
        let vault = vault.clone();
        Box::pin(async move {
            let vault = vault.ok_or_else(|| {
                SourceError::Config("No encryption key configured".to_string())
            })?;
            let source = AccountSource::open(&db, &vault, &account).await?;
            Ok(Box::new(source) as OpenedSource)
        })
    })
}

/// Removes messages from their origin servers, grouped per account so each
/// server connection is opened once. Returns the ids whose remote copy is
/// confirmed gone; only those may be deleted locally.
async fn delete_from_origin(
    db: &DatabaseConnection,
    messages: &[archived_message::Model],
    report: &mut DeleteReport,
    mut opener: SourceOpener,
) -> Vec<i64> {
    let mut groups: BTreeMap<&str, Vec<&archived_message::Model>> = BTreeMap::new();
    for message in messages {
        groups.entry(&message.account_name).or_default().push(message);
    }

    let mut removable = Vec::new();

    for (account_name, group) in groups {
        let account = match account_repo::find_by_name(db, account_name).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(
                    "No fetch account '{}' for {} archived messages; skipping remote deletion",
                    account_name,
                    group.len()
                );
                let _ = log_repo::append(
                    db,
                    "warning",
                    "deletion",
                    &format!(
                        "No fetch account '{}' found for remote deletion, archive copies kept",
                        account_name
                    ),
                    "",
                )
                .await;
                report.skipped_no_account += group.len();
                continue;
            }
            Err(e) => {
                warn!("Failed to look up account '{}': {}", account_name, e);
                report.skipped_no_account += group.len();
                continue;
            }
        };

        let mut source = match opener(account).await {
            Ok(source) => source,
            Err(e) => {
                warn!(
                    "Cannot open '{}' for remote deletion ({} messages kept): {}",
                    account_name,
                    group.len(),
                    e
                );
                let _ = log_repo::append(
                    db,
                    "error",
                    &format!("source:{}", account_name),
                    &format!("Remote deletion connection failed: {}", e),
                    "",
                )
                .await;
                report.skipped_no_account += group.len();
                continue;
            }
        };

        for (index, message) in group.iter().enumerate() {
            let candidate = candidate_for(message);
            let expunge = index == group.len() - 1;
            match source
                .delete_or_trash(&message.folder, &candidate, expunge)
                .await
            {
                Ok(()) => {
                    report.deleted_remote += 1;
                    removable.push(message.id);
                }
                Err(e) => {
                    // Keep the archive copy; the next sweep retries.
                    report.failed_remote += 1;
                    warn!(
                        "Remote deletion failed for message {} on '{}': {}",
                        message.uid, account_name, e
                    );
                    let _ = log_repo::append(
                        db,
                        "error",
                        &format!("source:{}", account_name),
                        &format!(
                            "Failed to delete message uid {} from mail server: {}",
                            message.uid, e
                        ),
                        "",
                    )
                    .await;
                }
            }
        }

        let _ = source.close().await;
    }

    removable
}

/// Rebuilds the adapter-facing candidate from a stored row. Rows written
/// before provider ids were stored fall back to the numeric uid, which is
/// correct for IMAP.
fn candidate_for(message: &archived_message::Model) -> Candidate {
    Candidate {
        provider_id: message
            .provider_id
            .clone()
            .unwrap_or_else(|| message.uid.to_string()),
        uid: message.uid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;
    use crate::db::message_repo::NewMessage;

    fn stored(account: &str, uid: i64) -> NewMessage {
        NewMessage {
            account_name: account.to_string(),
            folder: "INBOX".to_string(),
            uid,
            provider_id: Some(uid.to_string()),
            raw: b"From: x@y\r\n\r\nbody".to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_only_delete_records_stats() {
        let db = init_in_memory().await.unwrap();
        message_repo::insert(&db, stored("acct", 1)).await.unwrap();
        message_repo::insert(&db, stored("acct", 2)).await.unwrap();

        let all = message_repo::find_older_than(&db, Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        let report = delete_archived(&db, None, all, false, DeletionType::Manual)
            .await
            .unwrap();

        assert_eq!(report.deleted_local, 2);
        assert_eq!(report.deleted_remote, 0);
        assert_eq!(message_repo::count(&db).await.unwrap(), 0);
        assert_eq!(
            stats_repo::total_for_type(&db, DeletionType::Manual)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_remote_delete_without_account_keeps_archive() {
        let db = init_in_memory().await.unwrap();
        message_repo::insert(&db, stored("orphaned", 1)).await.unwrap();

        let vault = Arc::new(
            CredentialVault::from_hex_key(
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            )
            .unwrap(),
        );
        let all = message_repo::find_older_than(&db, Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        let report = delete_archived(&db, Some(vault), all, true, DeletionType::Retention)
            .await
            .unwrap();

        // No account to delete from: the archive copy survives.
        assert_eq!(report.skipped_no_account, 1);
        assert_eq!(report.deleted_local, 0);
        assert_eq!(message_repo::count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_id_ignores_missing_rows() {
        let db = init_in_memory().await.unwrap();
        message_repo::insert(&db, stored("acct", 1)).await.unwrap();
        let row = message_repo::find_by_natural_key(&db, "acct", "INBOX", 1)
            .await
            .unwrap()
            .unwrap();

        let report = delete_messages_by_id(&db, None, &[row.id, 9999], false)
            .await
            .unwrap();
        assert_eq!(report.deleted_local, 1);
    }

    #[test]
    fn test_candidate_fallback_for_legacy_rows() {
        let message = archived_message::Model {
            id: 1,
            account_name: "acct".to_string(),
            folder: "INBOX".to_string(),
            uid: 77,
            provider_id: None,
            subject: None,
            sender: None,
            recipients: None,
            date: None,
            raw_email: vec![],
            compressed: true,
            virus_scanned: false,
            virus_detected: false,
            virus_name: None,
            scan_timestamp: None,
            created_at: Utc::now(),
        };
        let candidate = candidate_for(&message);
        assert_eq!(candidate.provider_id, "77");
        assert_eq!(candidate.uid, 77);
    }
}
