//! Settings repository — global key/value configuration rows.

use std::collections::HashMap;

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection};

use super::entities::setting::{ActiveModel, Column, Entity};
use super::error::Result;
use crate::config::SettingsSnapshot;

/// Loads all settings rows into a map.
pub async fn load_map(db: &DatabaseConnection) -> Result<HashMap<String, String>> {
    let rows = Entity::find().all(db).await?;
    Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
}

/// Loads a parsed settings snapshot (one per scheduler tick).
pub async fn load_snapshot(db: &DatabaseConnection) -> Result<SettingsSnapshot> {
    Ok(SettingsSnapshot::from_map(&load_map(db).await?))
}

/// Upserts one setting.
pub async fn set(db: &DatabaseConnection, key: &str, value: &str) -> Result<()> {
    let model = ActiveModel {
        key: Set(key.to_string()),
        value: Set(value.to_string()),
    };
    Entity::insert(model)
        .on_conflict(
            OnConflict::column(Column::Key)
                .update_column(Column::Value)
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}
