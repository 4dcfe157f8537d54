//! Fetch cursor entity: per-account per-folder fetch position.

use sea_orm::entity::prelude::*;

/// Fetch cursor entity model.
///
/// Composite (account_id, folder) unique key. IMAP folders track last_uid;
/// delta-sync sources (Gmail history, Graph delta) track an opaque token.
/// A cursor only moves after the corresponding message is durably stored.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "fetch_cursors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub account_id: i32,
    pub folder: String,

    /// Highest ingested UID for IMAP folders; 0 means fetch everything.
    pub last_uid: i64,
    /// Opaque provider token for delta-sync sources; None means full resync.
    pub last_sync_token: Option<String>,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::fetch_account::Entity",
        from = "Column::AccountId",
        to = "super::fetch_account::Column::Id",
        on_delete = "Cascade"
    )]
    FetchAccount,
}

impl Related<super::fetch_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FetchAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
