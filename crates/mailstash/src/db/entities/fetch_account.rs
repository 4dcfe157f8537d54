//! Fetch account entity: one configured mail source.

use sea_orm::entity::prelude::*;

/// Fetch account entity model.
///
/// Identity and connection parameters for one mail source. IMAP accounts use
/// host/port/username/password; OAuth accounts (gmail, o365) use the
/// oauth_* columns. All secrets are vault ciphertext, never plaintext.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "fetch_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Unique display name, also the source label on archived messages.
    #[sea_orm(unique)]
    pub name: String,

    /// One of "imap", "gmail", "o365".
    pub account_type: String,

    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    /// Vault-encrypted IMAP password.
    pub password_encrypted: Option<String>,
    pub use_ssl: bool,
    pub require_starttls: bool,

    pub oauth_client_id: Option<String>,
    pub oauth_client_secret_encrypted: Option<String>,
    pub oauth_refresh_token_encrypted: Option<String>,
    pub oauth_access_token_encrypted: Option<String>,
    pub oauth_token_expiry: Option<DateTimeUtc>,

    pub poll_interval_seconds: i32,
    pub delete_after_processing: bool,
    /// IMAP only: EXPUNGE after flagging \Deleted.
    pub expunge_deleted: bool,
    pub enabled: bool,

    pub last_heartbeat: Option<DateTimeUtc>,
    pub last_success: Option<DateTimeUtc>,
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::fetch_cursor::Entity")]
    FetchCursor,
}

impl Related<super::fetch_cursor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FetchCursor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
