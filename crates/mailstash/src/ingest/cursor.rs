//! Cursor store: typed access to per-(account, folder) fetch positions.
//!
//! Wraps the cursor repository with the adapter-facing [`Cursor`] type so
//! integer UID cursors and opaque sync tokens never mix. Advancing is always
//! ordered after the corresponding message-store commit by the pipeline.

use sea_orm::DatabaseConnection;

use crate::db::cursor_repo;
use crate::db::error::Result;
use crate::source::{Cursor, CursorKind};

/// Typed cursor store for one database handle.
#[derive(Clone)]
pub struct CursorStore {
    db: DatabaseConnection,
}

impl CursorStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Current cursor for a folder. First run defaults to "fetch everything":
    /// UID 0 for IMAP, no token for delta-sync.
    pub async fn get(&self, account_id: i32, folder: &str, kind: CursorKind) -> Result<Cursor> {
        match kind {
            CursorKind::Uid => Ok(Cursor::Uid(
                cursor_repo::last_uid(&self.db, account_id, folder).await?,
            )),
            CursorKind::Token => Ok(Cursor::Token(
                cursor_repo::sync_token(&self.db, account_id, folder).await?,
            )),
        }
    }

    /// Advances the UID cursor after a message was durably stored.
    pub async fn advance_uid(&self, account_id: i32, folder: &str, uid: i64) -> Result<()> {
        cursor_repo::advance_uid(&self.db, account_id, folder, uid).await
    }

    /// Replaces the sync token after a fully-ingested delta batch.
    pub async fn advance_token(&self, account_id: i32, folder: &str, token: &str) -> Result<()> {
        cursor_repo::set_sync_token(&self.db, account_id, folder, token).await
    }
}
