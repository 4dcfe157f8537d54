//! End-to-end ingestion pipeline tests against a scriptable source.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use mailstash::antivirus::ScanAction;
use mailstash::db::{account_repo, cursor_repo, log_repo, message_repo};
use mailstash::ingest::pipeline::{run_and_record, run_cycle};
use mailstash::source::{Candidate, CursorKind};

use common::{
    create_account, infected_raw, init_db, sample_raw, Injected, MockMessage, MockSource, StubGate,
};

#[tokio::test]
async fn end_to_end_quarantine_scenario() {
    // Account with folder INBOX, cursor 0; adapter reports UIDs [101, 102];
    // 101 is clean, 102 infected; policy quarantine.
    let db = init_db().await;
    let account = create_account(&db, "probe", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(101, sample_raw(101)),
        MockMessage::imap(102, infected_raw(102)),
    ]);
    let gate = StubGate::up();

    run_and_record(
        &db,
        &account,
        &mut source,
        Some(&gate),
        ScanAction::Quarantine,
        None,
    )
    .await;

    // Two stored rows, 102 flagged.
    assert_eq!(message_repo::count(&db).await.unwrap(), 2);

    let clean = message_repo::find_by_natural_key(&db, "probe", "INBOX", 101)
        .await
        .unwrap()
        .unwrap();
    assert!(clean.virus_scanned);
    assert!(!clean.virus_detected);
    assert_eq!(clean.subject.as_deref(), Some("Message 101"));
    assert!(clean.sender.as_deref().unwrap().contains("alice@example.com"));

    let flagged = message_repo::find_by_natural_key(&db, "probe", "INBOX", 102)
        .await
        .unwrap()
        .unwrap();
    assert!(flagged.virus_scanned);
    assert!(flagged.virus_detected);
    assert_eq!(flagged.virus_name.as_deref(), Some("Eicar-Test-Signature"));
    assert!(flagged.scan_timestamp.is_some());

    // Cursor advanced to 102.
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 102);

    // last_success updated, last_error unchanged.
    let refreshed = account_repo::find(&db, account.id).await.unwrap().unwrap();
    assert!(refreshed.last_success.is_some());
    assert!(refreshed.last_error.is_none());
}

#[tokio::test]
async fn ingestion_is_idempotent_across_cycles() {
    let db = init_db().await;
    let account = create_account(&db, "twice", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![MockMessage::imap(7, sample_raw(7))]);

    let first = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(first.stored, 1);

    // Server re-lists the same UID (cursor state lost upstream); the
    // natural key makes re-ingestion a no-op.
    let mut replay = MockSource::with_inbox(vec![MockMessage::imap(7, sample_raw(7))]);
    replay.ignore_cursor = true;
    let second = run_cycle(&db, &account, &mut replay, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    assert_eq!(second.stored, 0);
    assert_eq!(second.already_archived, 1);
    assert_eq!(message_repo::count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn reject_policy_drops_infected_but_advances_cursor() {
    let db = init_db().await;
    let account = create_account(&db, "strict", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(1, sample_raw(1)),
        MockMessage::imap(2, infected_raw(2)),
        MockMessage::imap(3, sample_raw(3)),
    ]);
    let gate = StubGate::up();

    let outcome = run_cycle(
        &db,
        &account,
        &mut source,
        Some(&gate),
        ScanAction::Reject,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.stored, 2);
    assert_eq!(outcome.rejected, 1);

    // The infected message is absent and will not be retried.
    assert!(message_repo::find_by_natural_key(&db, "strict", "INBOX", 2)
        .await
        .unwrap()
        .is_none());
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 3);
}

#[tokio::test]
async fn log_only_policy_stores_infected_messages() {
    let db = init_db().await;
    let account = create_account(&db, "permissive", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![MockMessage::imap(9, infected_raw(9))]);
    let gate = StubGate::up();

    let outcome = run_cycle(
        &db,
        &account,
        &mut source,
        Some(&gate),
        ScanAction::LogOnly,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.stored, 1);
    let row = message_repo::find_by_natural_key(&db, "permissive", "INBOX", 9)
        .await
        .unwrap()
        .unwrap();
    assert!(row.virus_detected);
}

#[tokio::test]
async fn scanner_unavailable_stores_unscanned_with_warning() {
    let db = init_db().await;
    let account = create_account(&db, "degraded", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![MockMessage::imap(4, sample_raw(4))]);
    let gate = StubGate::down();

    run_and_record(
        &db,
        &account,
        &mut source,
        Some(&gate),
        ScanAction::Quarantine,
        None,
    )
    .await;

    // Never drop messages because the scanner is down.
    let row = message_repo::find_by_natural_key(&db, "degraded", "INBOX", 4)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.virus_scanned);
    assert!(!row.virus_detected);
    assert!(row.scan_timestamp.is_none());

    // The degradation is surfaced as a warning.
    let entries = log_repo::recent_for_source(&db, "source:degraded", 10)
        .await
        .unwrap();
    assert!(entries
        .iter()
        .any(|e| e.level == "warning" && e.message.contains("unscanned")));

    // The cycle still counts as a success.
    let refreshed = account_repo::find(&db, account.id).await.unwrap().unwrap();
    assert!(refreshed.last_success.is_some());
}

#[tokio::test]
async fn message_failure_skips_but_holds_cursor() {
    let db = init_db().await;
    let account = create_account(&db, "partial", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(101, sample_raw(101)),
        MockMessage::imap(102, sample_raw(102)),
        MockMessage::imap(103, sample_raw(103)),
    ]);
    source.fetch_failures.insert("102".to_string());

    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    // 101 and 103 stored, 102 skipped; the batch continued.
    assert_eq!(outcome.stored, 2);
    assert_eq!(outcome.message_errors, 1);

    // The cursor must not advance past the failed message.
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 101);

    // The failure is recorded, not silent.
    let entries = log_repo::recent_for_source(&db, "source:partial", 10)
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.message.contains("102")));

    // Next cycle retries 102 (and deduplicates 103).
    let mut retry = MockSource::with_inbox(vec![
        MockMessage::imap(102, sample_raw(102)),
        MockMessage::imap(103, sample_raw(103)),
    ]);
    let outcome = run_cycle(&db, &account, &mut retry, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.already_archived, 1);
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 103);
    assert_eq!(message_repo::count(&db).await.unwrap(), 3);
}

#[tokio::test]
async fn auth_failure_aborts_cycle_and_records_error() {
    let db = init_db().await;
    let account = create_account(&db, "locked-out", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![MockMessage::imap(1, sample_raw(1))]);
    source.list_error = Some(Injected::Auth);

    run_and_record(&db, &account, &mut source, None, ScanAction::Quarantine, None).await;

    assert_eq!(message_repo::count(&db).await.unwrap(), 0);
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 0);

    let refreshed = account_repo::find(&db, account.id).await.unwrap().unwrap();
    assert!(refreshed.last_error.as_deref().unwrap().contains("Authentication failed"));
    assert!(refreshed.last_success.is_none());
}

#[tokio::test]
async fn connection_loss_mid_batch_keeps_partial_progress() {
    let db = init_db().await;
    let account = create_account(&db, "flaky", |_| {}).await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(10, sample_raw(10)),
        MockMessage::imap(11, sample_raw(11)),
    ]);
    source.fetch_connection_failures.insert("11".to_string());

    run_and_record(&db, &account, &mut source, None, ScanAction::Quarantine, None).await;

    // 10 was stored with its cursor advance committed before the failure.
    assert_eq!(message_repo::count(&db).await.unwrap(), 1);
    assert_eq!(cursor_repo::last_uid(&db, account.id, "INBOX").await.unwrap(), 10);

    let refreshed = account_repo::find(&db, account.id).await.unwrap().unwrap();
    assert!(refreshed.last_error.is_some());
}

#[tokio::test]
async fn missing_folder_skips_but_other_folders_ingest() {
    let db = init_db().await;
    let account = create_account(&db, "multi-folder", |_| {}).await;

    let mut source = MockSource::new();
    source.folders = vec!["Ghost".to_string(), "INBOX".to_string()];
    source
        .folder_errors
        .insert("Ghost".to_string(), Injected::FolderNotFound);
    source.messages.insert(
        "INBOX".to_string(),
        vec![MockMessage::imap(5, sample_raw(5))],
    );

    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    assert_eq!(outcome.folders_skipped, 1);
    assert_eq!(outcome.stored, 1);
    assert_eq!(message_repo::count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_after_processing_removes_from_origin() {
    let db = init_db().await;
    let account = create_account(&db, "consume", |a| {
        a.delete_after_processing = true;
        a.expunge_deleted = true;
    })
    .await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(1, sample_raw(1)),
        MockMessage::imap(2, sample_raw(2)),
    ]);

    run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    let deletes = source.deletes();
    assert_eq!(deletes.len(), 2);
    // Flag both, expunge only once, after the last message.
    assert_eq!(deletes[0], ("INBOX".to_string(), "1".to_string(), false));
    assert_eq!(deletes[1], ("INBOX".to_string(), "2".to_string(), true));

    // The archive copies stay.
    assert_eq!(message_repo::count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn delete_after_processing_skipped_when_batch_incomplete() {
    let db = init_db().await;
    let account = create_account(&db, "careful", |a| {
        a.delete_after_processing = true;
    })
    .await;

    let mut source = MockSource::with_inbox(vec![
        MockMessage::imap(1, sample_raw(1)),
        MockMessage::imap(2, sample_raw(2)),
    ]);
    source.fetch_failures.insert("2".to_string());

    run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    // A partial batch must leave the origin untouched so the retry can
    // still find every message.
    assert!(source.deletes().is_empty());
}

#[tokio::test]
async fn delta_source_advances_token_only_on_complete_batch() {
    let db = init_db().await;
    let account = create_account(&db, "deltas", |a| {
        a.account_type = "gmail".to_string();
    })
    .await;

    let mut source = MockSource::new();
    source.kind = CursorKind::Token;
    source.delta_batches = HashMap::from([(
        ("INBOX".to_string(), None),
        vec![
            MockMessage::provider("g-1", sample_raw(1)),
            MockMessage::provider("g-2", sample_raw(2)),
        ],
    )]);
    source.next_token = Some("hist-100".to_string());
    source.fetch_failures.insert("g-2".to_string());

    // First cycle: g-2 fails, token must not advance.
    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.message_errors, 1);
    assert_eq!(cursor_repo::sync_token(&db, account.id, "INBOX").await.unwrap(), None);

    // Second cycle: same batch replays, dedupe absorbs g-1, token advances.
    source.fetch_failures.clear();
    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.already_archived, 1);
    assert_eq!(
        cursor_repo::sync_token(&db, account.id, "INBOX").await.unwrap().as_deref(),
        Some("hist-100")
    );

    // Third cycle resumes from the stored token; nothing new.
    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(outcome.processed(), 0);
}

#[tokio::test]
async fn slow_account_does_not_delay_another() {
    let db = init_db().await;
    let fast_account = create_account(&db, "fast", |_| {}).await;
    let slow_account = create_account(&db, "slow", |_| {}).await;

    let mut slow = MockSource::with_inbox(vec![MockMessage::imap(1, sample_raw(1))]);
    slow.delay = Some(Duration::from_secs(30));
    let mut fast = MockSource::with_inbox(vec![MockMessage::imap(1, sample_raw(1))]);

    let db_slow = db.clone();
    let slow_task = tokio::spawn(async move {
        run_cycle(
            &db_slow,
            &slow_account,
            &mut slow,
            None,
            ScanAction::Quarantine,
            None,
        )
        .await
    });

    // The fast account completes while the slow one is still blocked.
    let started = std::time::Instant::now();
    let outcome = run_cycle(&db, &fast_account, &mut fast, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(outcome.stored, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!slow_task.is_finished());

    slow_task.abort();
}

#[tokio::test]
async fn unparseable_message_still_archives_byte_for_byte() {
    let db = init_db().await;
    let account = create_account(&db, "binary", |_| {}).await;

    let garbage = vec![0x00, 0xff, 0x13, 0x37, 0x80];
    let mut source = MockSource::with_inbox(vec![MockMessage::imap(1, garbage.clone())]);

    let outcome = run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();
    assert_eq!(outcome.stored, 1);

    let row = message_repo::find_by_natural_key(&db, "binary", "INBOX", 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_repo::raw_bytes(&row).unwrap(), garbage);
}

#[tokio::test]
async fn candidate_uid_matches_stored_natural_key_for_providers() {
    // The uid derived from a provider id is the one persisted, so remote
    // deletion and dedupe agree on the key.
    let candidate = Candidate::from_provider_id("AXfG-17zb");
    let db = init_db().await;
    let account = create_account(&db, "keyed", |a| {
        a.account_type = "o365".to_string();
    })
    .await;

    let mut source = MockSource::new();
    source.kind = CursorKind::Token;
    source.delta_batches = HashMap::from([(
        ("INBOX".to_string(), None),
        vec![MockMessage::provider("AXfG-17zb", sample_raw(1))],
    )]);

    run_cycle(&db, &account, &mut source, None, ScanAction::Quarantine, None)
        .await
        .unwrap();

    let row = message_repo::find_by_natural_key(&db, "keyed", "INBOX", candidate.uid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.provider_id.as_deref(), Some("AXfG-17zb"));
}
