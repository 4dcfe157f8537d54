//! Mail source adapters.
//!
//! One adapter per account type (IMAP, Gmail API, Office 365 Graph), all
//! behind the [`MailSource`] capability set. The ingestion pipeline only
//! talks to the trait; [`AccountSource`] is the tagged dispatch over
//! account_type.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use sha2::{Digest, Sha256};

pub mod error;
pub mod gmail;
pub mod graph;
pub mod imap;
pub mod oauth;

pub use error::{Result, SourceError};
pub use gmail::GmailSource;
pub use graph::GraphSource;
pub use imap::ImapSource;

use crate::db::entities::fetch_account;
use crate::secrets::CredentialVault;

/// Supported account types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Imap,
    Gmail,
    O365,
}

impl AccountType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "imap" => Some(AccountType::Imap),
            "gmail" => Some(AccountType::Gmail),
            "o365" => Some(AccountType::O365),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Imap => "imap",
            AccountType::Gmail => "gmail",
            AccountType::O365 => "o365",
        }
    }
}

/// Which cursor representation an adapter uses. The two are never conflated:
/// IMAP folders track an integer UID, delta-sync sources an opaque token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Uid,
    Token,
}

/// Fetch position for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Highest ingested UID; 0 means fetch everything.
    Uid(i64),
    /// Opaque delta-sync token; None means full resync.
    Token(Option<String>),
}

impl Cursor {
    pub fn kind(&self) -> CursorKind {
        match self {
            Cursor::Uid(_) => CursorKind::Uid,
            Cursor::Token(_) => CursorKind::Token,
        }
    }
}

/// One not-yet-ingested message as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Provider-native message identifier (IMAP UID as decimal string,
    /// Gmail/Graph message id).
    pub provider_id: String,
    /// Natural-key UID: the IMAP UID itself, or a stable hash of the
    /// provider id for delta-sync sources.
    pub uid: i64,
}

impl Candidate {
    /// Candidate for an IMAP UID.
    pub fn from_uid(uid: u32) -> Self {
        Self {
            provider_id: uid.to_string(),
            uid: uid as i64,
        }
    }

    /// Candidate for a provider-assigned string id.
    pub fn from_provider_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let uid = stable_uid(&id);
        Self {
            provider_id: id,
            uid,
        }
    }
}

/// Derives a stable non-negative i64 from a provider message id: the first
/// 8 bytes of SHA-256, sign-masked. Stable across processes and restarts so
/// re-ingestion of the same provider id always hits the same natural key.
pub fn stable_uid(provider_id: &str) -> i64 {
    let digest = Sha256::digest(provider_id.as_bytes());
    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(first8) & 0x7fff_ffff_ffff_ffff) as i64
}

/// Capability set every mail source implements.
#[async_trait]
pub trait MailSource: Send {
    /// Cursor representation this source uses.
    fn cursor_kind(&self) -> CursorKind;

    /// Verifies connectivity and credentials without ingesting anything.
    /// Used interactively by the UI and before first poll.
    async fn test_connection(&mut self) -> Result<()>;

    /// Folders to poll. IMAP lists the account's selectable mailboxes;
    /// delta-sync sources expose a single INBOX.
    async fn folders(&mut self) -> Result<Vec<String>>;

    /// Messages newer than the cursor. IMAP returns UIDs above the cursor in
    /// ascending order; delta-sync sources return additions since the token
    /// in API order (upstream deletions and moves are not reported).
    async fn list_new(&mut self, folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>>;

    /// Raw RFC822 bytes for one message.
    async fn fetch_raw(&mut self, folder: &str, candidate: &Candidate) -> Result<Vec<u8>>;

    /// Removes a message at the origin. IMAP flags \Deleted and optionally
    /// expunges; OAuth providers move to trash/deleted-items (provider
    /// policy controls actual erasure).
    async fn delete_or_trash(
        &mut self,
        folder: &str,
        candidate: &Candidate,
        expunge: bool,
    ) -> Result<()>;

    /// Fresh cursor to persist after a fully-ingested batch. Sources whose
    /// cursor advances per message (IMAP) return None.
    async fn next_cursor(&mut self, folder: &str) -> Result<Option<Cursor>>;

    /// Graceful disconnect. Safe to call when not connected.
    async fn close(&mut self) -> Result<()>;
}

/// Interactive connectivity check for the UI's "test connection" button.
/// Uses the exact same adapter construction and contract as the pipeline.
pub async fn test_account_connection(
    db: &DatabaseConnection,
    vault: &CredentialVault,
    account: &fetch_account::Model,
) -> Result<()> {
    let mut source = AccountSource::open(db, vault, account).await?;
    source.test_connection().await
}

/// Tagged dispatch over account_type.
pub enum AccountSource {
    Imap(ImapSource),
    Gmail(GmailSource),
    Graph(GraphSource),
}

impl AccountSource {
    /// Builds the adapter for an account, decrypting credentials and
    /// refreshing OAuth tokens as needed.
    pub async fn open(
        db: &DatabaseConnection,
        vault: &CredentialVault,
        account: &fetch_account::Model,
    ) -> Result<Self> {
        let account_type = AccountType::parse(&account.account_type).ok_or_else(|| {
            SourceError::Config(format!("Unknown account type: {}", account.account_type))
        })?;

        match account_type {
            AccountType::Imap => Ok(AccountSource::Imap(ImapSource::from_account(
                vault, account,
            )?)),
            AccountType::Gmail => {
                let token = oauth::ensure_access_token(db, vault, account).await?;
                Ok(AccountSource::Gmail(GmailSource::new(token)))
            }
            AccountType::O365 => {
                let token = oauth::ensure_access_token(db, vault, account).await?;
                Ok(AccountSource::Graph(GraphSource::new(token)))
            }
        }
    }

    fn inner(&mut self) -> &mut dyn MailSource {
        match self {
            AccountSource::Imap(s) => s,
            AccountSource::Gmail(s) => s,
            AccountSource::Graph(s) => s,
        }
    }
}

#[async_trait]
impl MailSource for AccountSource {
    fn cursor_kind(&self) -> CursorKind {
        match self {
            AccountSource::Imap(_) => CursorKind::Uid,
            AccountSource::Gmail(_) | AccountSource::Graph(_) => CursorKind::Token,
        }
    }

    async fn test_connection(&mut self) -> Result<()> {
        self.inner().test_connection().await
    }

    async fn folders(&mut self) -> Result<Vec<String>> {
        self.inner().folders().await
    }

    async fn list_new(&mut self, folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>> {
        self.inner().list_new(folder, cursor).await
    }

    async fn fetch_raw(&mut self, folder: &str, candidate: &Candidate) -> Result<Vec<u8>> {
        self.inner().fetch_raw(folder, candidate).await
    }

    async fn delete_or_trash(
        &mut self,
        folder: &str,
        candidate: &Candidate,
        expunge: bool,
    ) -> Result<()> {
        self.inner().delete_or_trash(folder, candidate, expunge).await
    }

    async fn next_cursor(&mut self, folder: &str) -> Result<Option<Cursor>> {
        self.inner().next_cursor(folder).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner().close().await
    }
}
