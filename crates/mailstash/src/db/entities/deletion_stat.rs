//! Deletion statistics entity: aggregate counters for reporting.

use sea_orm::entity::prelude::*;

/// Deletion statistic entity model.
///
/// One counter per (date, deletion_type, deleted_from_mail_server); the
/// count is incremented, never individually mutated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deletion_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub deletion_date: Date,
    /// "manual" or "retention".
    pub deletion_type: String,
    pub deleted_from_mail_server: bool,

    pub count: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
