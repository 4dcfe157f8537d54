//! Archived message entity: one uniquely identified stored message.

use sea_orm::entity::prelude::*;

/// Archived message entity model.
///
/// Natural key (account_name, folder, uid), enforced by a unique index;
/// re-ingestion of the same key is a no-op. The raw RFC822 bytes are stored
/// gzip-compressed and round-trip byte-for-byte. Header fields are
/// denormalized for search and filtering. Rows outlive their fetch account.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "archived_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Source account name at ingestion time (not a foreign key).
    pub account_name: String,
    pub folder: String,
    /// Provider-native UID (IMAP) or stable hash of the provider id.
    pub uid: i64,
    /// Provider-native identifier as a string, kept for remote deletion
    /// (Gmail/Graph ids cannot be reconstructed from the uid hash).
    pub provider_id: Option<String>,

    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Option<String>,
    /// Date header as transmitted.
    pub date: Option<String>,

    pub raw_email: Vec<u8>,
    pub compressed: bool,

    pub virus_scanned: bool,
    pub virus_detected: bool,
    pub virus_name: Option<String>,
    pub scan_timestamp: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
