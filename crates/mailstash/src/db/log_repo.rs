//! System log repository — structured error/event stream.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, QueryOrder, QuerySelect};

use super::entities::system_log::{ActiveModel, Column, Entity, Model};
use super::error::Result;

/// Caps matching the UI's display expectations.
const MAX_MESSAGE_LENGTH: usize = 500;
const MAX_DETAILS_LENGTH: usize = 4000;

/// Appends a log entry. Message and details are truncated to their caps.
pub async fn append(
    db: &DatabaseConnection,
    level: &str,
    source: &str,
    message: &str,
    details: &str,
) -> Result<()> {
    let model = ActiveModel {
        timestamp: Set(Utc::now()),
        level: Set(level.to_string()),
        source: Set(source.to_string()),
        message: Set(truncate(message, MAX_MESSAGE_LENGTH)),
        details: Set(truncate(details, MAX_DETAILS_LENGTH)),
        ..Default::default()
    };
    model.insert(db).await?;
    Ok(())
}

/// Most recent entries, newest first.
pub async fn recent(db: &DatabaseConnection, limit: u64) -> Result<Vec<Model>> {
    Ok(Entity::find()
        .order_by_desc(Column::Timestamp)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

/// Entries from one source label, newest first (per-account error stream).
pub async fn recent_for_source(
    db: &DatabaseConnection,
    source: &str,
    limit: u64,
) -> Result<Vec<Model>> {
    Ok(Entity::find()
        .filter(Column::Source.eq(source))
        .order_by_desc(Column::Timestamp)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
