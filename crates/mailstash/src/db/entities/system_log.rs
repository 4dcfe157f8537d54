//! System log entity: structured error/event stream surfaced to the UI.

use sea_orm::entity::prelude::*;

/// System log entry model.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "system_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub timestamp: DateTimeUtc,
    /// "error", "warning" or "info".
    pub level: String,
    /// Origin label, e.g. "source:Work Gmail" or "retention".
    pub source: String,
    pub message: String,
    pub details: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
