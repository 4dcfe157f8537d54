//! Deletion statistics repository — insert-or-increment aggregate counters.

use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, IntoActiveModel, TransactionTrait};

use super::entities::deletion_stat::{ActiveModel, Column, Entity, Model};
use super::error::Result;

/// How messages were deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionType {
    Manual,
    Retention,
}

impl DeletionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionType::Manual => "manual",
            DeletionType::Retention => "retention",
        }
    }
}

/// Adds `count` to the (date, type, from_server) counter, creating it on
/// first use. Counters are only ever incremented.
pub async fn record_deletion(
    db: &DatabaseConnection,
    date: NaiveDate,
    deletion_type: DeletionType,
    deleted_from_mail_server: bool,
    count: u64,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }

    let txn = db.begin().await?;

    let existing = Entity::find()
        .filter(Column::DeletionDate.eq(date))
        .filter(Column::DeletionType.eq(deletion_type.as_str()))
        .filter(Column::DeletedFromMailServer.eq(deleted_from_mail_server))
        .one(&txn)
        .await?;

    match existing {
        Some(row) => {
            let total = row.count + count as i64;
            let mut model = row.into_active_model();
            model.count = Set(total);
            model.update(&txn).await?;
        }
        None => {
            let model = ActiveModel {
                deletion_date: Set(date),
                deletion_type: Set(deletion_type.as_str().to_string()),
                deleted_from_mail_server: Set(deleted_from_mail_server),
                count: Set(count as i64),
                ..Default::default()
            };
            model.insert(&txn).await?;
        }
    }

    txn.commit().await?;
    Ok(())
}

/// All counters for one date (reporting).
pub async fn find_by_date(db: &DatabaseConnection, date: NaiveDate) -> Result<Vec<Model>> {
    Ok(Entity::find()
        .filter(Column::DeletionDate.eq(date))
        .all(db)
        .await?)
}

/// Total deletions of one type across all dates.
pub async fn total_for_type(
    db: &DatabaseConnection,
    deletion_type: DeletionType,
) -> Result<i64> {
    let rows = Entity::find()
        .filter(Column::DeletionType.eq(deletion_type.as_str()))
        .all(db)
        .await?;
    Ok(rows.iter().map(|r| r.count).sum())
}
