//! Shared fixtures for integration tests: an in-memory database, a
//! scriptable mail source and a stub scan gate.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;

use mailstash::antivirus::{ScanGate, ScanReport, Verdict};
use mailstash::db::account_repo::{self, NewAccount};
use mailstash::db::entities::fetch_account;
use mailstash::source::{Candidate, Cursor, CursorKind, MailSource, Result, SourceError};

pub async fn init_db() -> DatabaseConnection {
    mailstash::db::init_in_memory()
        .await
        .expect("Failed to open in-memory database")
}

/// Creates an enabled IMAP-style account row; `tweak` adjusts the defaults.
pub async fn create_account(
    db: &DatabaseConnection,
    name: &str,
    tweak: impl FnOnce(&mut NewAccount),
) -> fetch_account::Model {
    let mut account = NewAccount {
        name: name.to_string(),
        account_type: "imap".to_string(),
        host: Some("mail.example.com".to_string()),
        port: Some(993),
        username: Some("archiver@example.com".to_string()),
        use_ssl: true,
        poll_interval_seconds: 300,
        enabled: true,
        ..Default::default()
    };
    tweak(&mut account);
    account_repo::create(db, account)
        .await
        .expect("Failed to create account")
}

/// Minimal RFC822 message for one UID.
pub fn sample_raw(uid: i64) -> Vec<u8> {
    format!(
        "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\n\
Subject: Message {}\r\nDate: Mon, 2 Mar 2026 10:00:00 +0000\r\n\r\nBody of {}\r\n",
        uid, uid
    )
    .into_bytes()
}

/// EICAR-marked body; [`StubGate`] reports these as infected.
pub fn infected_raw(uid: i64) -> Vec<u8> {
    format!(
        "From: mallory@example.com\r\nSubject: Invoice {}\r\n\r\nEICAR test payload\r\n",
        uid
    )
    .into_bytes()
}

#[derive(Clone)]
pub struct MockMessage {
    pub candidate: Candidate,
    pub raw: Vec<u8>,
}

impl MockMessage {
    pub fn imap(uid: u32, raw: Vec<u8>) -> Self {
        Self {
            candidate: Candidate::from_uid(uid),
            raw,
        }
    }

    pub fn provider(id: &str, raw: Vec<u8>) -> Self {
        Self {
            candidate: Candidate::from_provider_id(id),
            raw,
        }
    }
}

/// Errors the mock can be scripted to raise.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    Auth,
    Connection,
    FolderNotFound,
}

impl Injected {
    fn to_error(self, context: &str) -> SourceError {
        match self {
            Injected::Auth => SourceError::AuthenticationFailed("invalid credentials".to_string()),
            Injected::Connection => {
                SourceError::ConnectionFailed("connection reset by peer".to_string())
            }
            Injected::FolderNotFound => SourceError::FolderNotFound(context.to_string()),
        }
    }
}

/// Scriptable mail source. Shared state (delete log, remote failure set) is
/// behind `Arc<Mutex<..>>` so tests keep handles after moving the mock.
#[derive(Clone)]
pub struct MockSource {
    pub kind: CursorKind,
    pub folders: Vec<String>,
    /// Folder -> messages, consumed by UID-cursor listing.
    pub messages: HashMap<String, Vec<MockMessage>>,
    /// (folder, token) -> batch, consumed by token-cursor listing.
    pub delta_batches: HashMap<(String, Option<String>), Vec<MockMessage>>,
    /// Token handed out by next_cursor.
    pub next_token: Option<String>,
    /// Provider ids whose fetch fails with a message-level error.
    pub fetch_failures: HashSet<String>,
    /// Provider ids whose fetch fails with a connection-level error.
    pub fetch_connection_failures: HashSet<String>,
    /// Error raised when listing folders (whole-cycle failures).
    pub list_error: Option<Injected>,
    /// Per-folder listing errors.
    pub folder_errors: HashMap<String, Injected>,
    /// Artificial latency on list_new, for slow-adapter tests.
    pub delay: Option<Duration>,
    /// Report every message regardless of the cursor (simulates a server
    /// re-listing already-seen UIDs).
    pub ignore_cursor: bool,
    /// Provider ids whose remote deletion fails.
    pub remote_delete_failures: Arc<Mutex<HashSet<String>>>,
    /// (folder, provider_id, expunge) for every delete_or_trash call.
    pub delete_log: Arc<Mutex<Vec<(String, String, bool)>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            kind: CursorKind::Uid,
            folders: vec!["INBOX".to_string()],
            messages: HashMap::new(),
            delta_batches: HashMap::new(),
            next_token: None,
            fetch_failures: HashSet::new(),
            fetch_connection_failures: HashSet::new(),
            list_error: None,
            folder_errors: HashMap::new(),
            delay: None,
            ignore_cursor: false,
            remote_delete_failures: Arc::new(Mutex::new(HashSet::new())),
            delete_log: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_inbox(messages: Vec<MockMessage>) -> Self {
        let mut source = Self::new();
        source.messages.insert("INBOX".to_string(), messages);
        source
    }

    pub fn deletes(&self) -> Vec<(String, String, bool)> {
        self.delete_log.lock().unwrap().clone()
    }

    fn find_raw(&self, provider_id: &str) -> Option<Vec<u8>> {
        for messages in self.messages.values() {
            if let Some(found) = messages
                .iter()
                .find(|m| m.candidate.provider_id == provider_id)
            {
                return Some(found.raw.clone());
            }
        }
        for batch in self.delta_batches.values() {
            if let Some(found) = batch.iter().find(|m| m.candidate.provider_id == provider_id) {
                return Some(found.raw.clone());
            }
        }
        None
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailSource for MockSource {
    fn cursor_kind(&self) -> CursorKind {
        self.kind
    }

    async fn test_connection(&mut self) -> Result<()> {
        match self.list_error {
            Some(injected) => Err(injected.to_error("test")),
            None => Ok(()),
        }
    }

    async fn folders(&mut self) -> Result<Vec<String>> {
        if let Some(injected) = self.list_error {
            return Err(injected.to_error("folders"));
        }
        Ok(self.folders.clone())
    }

    async fn list_new(&mut self, folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(injected) = self.folder_errors.get(folder) {
            return Err(injected.to_error(folder));
        }

        match cursor {
            Cursor::Uid(last) => {
                let threshold = if self.ignore_cursor { -1 } else { *last };
                let mut candidates: Vec<Candidate> = self
                    .messages
                    .get(folder)
                    .map(|messages| {
                        messages
                            .iter()
                            .map(|m| m.candidate.clone())
                            .filter(|c| c.uid > threshold)
                            .collect()
                    })
                    .unwrap_or_default();
                candidates.sort_by_key(|c| c.uid);
                Ok(candidates)
            }
            Cursor::Token(token) => Ok(self
                .delta_batches
                .get(&(folder.to_string(), token.clone()))
                .map(|batch| batch.iter().map(|m| m.candidate.clone()).collect())
                .unwrap_or_default()),
        }
    }

    async fn fetch_raw(&mut self, _folder: &str, candidate: &Candidate) -> Result<Vec<u8>> {
        if self.fetch_connection_failures.contains(&candidate.provider_id) {
            return Err(SourceError::ConnectionFailed(
                "connection lost mid-fetch".to_string(),
            ));
        }
        if self.fetch_failures.contains(&candidate.provider_id) {
            return Err(SourceError::Message {
                id: candidate.provider_id.clone(),
                reason: "fetch returned garbage".to_string(),
            });
        }
        self.find_raw(&candidate.provider_id)
            .ok_or_else(|| SourceError::Message {
                id: candidate.provider_id.clone(),
                reason: "unknown message".to_string(),
            })
    }

    async fn delete_or_trash(
        &mut self,
        folder: &str,
        candidate: &Candidate,
        expunge: bool,
    ) -> Result<()> {
        if self
            .remote_delete_failures
            .lock()
            .unwrap()
            .contains(&candidate.provider_id)
        {
            return Err(SourceError::Protocol("EXPUNGE failed".to_string()));
        }
        self.delete_log.lock().unwrap().push((
            folder.to_string(),
            candidate.provider_id.clone(),
            expunge,
        ));
        Ok(())
    }

    async fn next_cursor(&mut self, _folder: &str) -> Result<Option<Cursor>> {
        match self.kind {
            CursorKind::Uid => Ok(None),
            CursorKind::Token => Ok(self
                .next_token
                .clone()
                .map(|token| Cursor::Token(Some(token)))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Scan gate stub: anything containing `EICAR` is infected; optionally the
/// daemon is down.
pub struct StubGate {
    pub unavailable: bool,
}

impl StubGate {
    pub fn up() -> Self {
        Self { unavailable: false }
    }

    pub fn down() -> Self {
        Self { unavailable: true }
    }
}

#[async_trait]
impl ScanGate for StubGate {
    async fn scan(&self, bytes: &[u8]) -> ScanReport {
        let verdict = if self.unavailable {
            Verdict::Unavailable
        } else if bytes.windows(5).any(|w| w == b"EICAR") {
            Verdict::Infected("Eicar-Test-Signature".to_string())
        } else {
            Verdict::Clean
        };
        ScanReport {
            verdict,
            timestamp: Utc::now(),
        }
    }
}
