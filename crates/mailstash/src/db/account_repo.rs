//! Fetch account repository — CRUD and health-field updates.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, QueryOrder};

use super::entities::fetch_account::{ActiveModel, Column, Entity, Model};
use super::error::Result;

/// Maximum stored length for last_error, matching the log message cap.
const MAX_ERROR_LENGTH: usize = 500;

/// Input for creating a fetch account. Secrets must already be vault
/// ciphertext.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub name: String,
    pub account_type: String,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    pub password_encrypted: Option<String>,
    pub use_ssl: bool,
    pub require_starttls: bool,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret_encrypted: Option<String>,
    pub oauth_refresh_token_encrypted: Option<String>,
    pub oauth_access_token_encrypted: Option<String>,
    pub oauth_token_expiry: Option<chrono::DateTime<Utc>>,
    pub poll_interval_seconds: i32,
    pub delete_after_processing: bool,
    pub expunge_deleted: bool,
    pub enabled: bool,
}

/// Creates a fetch account and returns the stored row.
pub async fn create(db: &DatabaseConnection, account: NewAccount) -> Result<Model> {
    let model = ActiveModel {
        name: Set(account.name),
        account_type: Set(account.account_type),
        host: Set(account.host),
        port: Set(account.port),
        username: Set(account.username),
        password_encrypted: Set(account.password_encrypted),
        use_ssl: Set(account.use_ssl),
        require_starttls: Set(account.require_starttls),
        oauth_client_id: Set(account.oauth_client_id),
        oauth_client_secret_encrypted: Set(account.oauth_client_secret_encrypted),
        oauth_refresh_token_encrypted: Set(account.oauth_refresh_token_encrypted),
        oauth_access_token_encrypted: Set(account.oauth_access_token_encrypted),
        oauth_token_expiry: Set(account.oauth_token_expiry),
        poll_interval_seconds: Set(account.poll_interval_seconds),
        delete_after_processing: Set(account.delete_after_processing),
        expunge_deleted: Set(account.expunge_deleted),
        enabled: Set(account.enabled),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    Ok(model.insert(db).await?)
}

/// Lists enabled accounts ordered by name. Disabled accounts are skipped
/// entirely by the scheduler.
pub async fn list_enabled(db: &DatabaseConnection) -> Result<Vec<Model>> {
    Ok(Entity::find()
        .filter(Column::Enabled.eq(true))
        .order_by_asc(Column::Name)
        .all(db)
        .await?)
}

/// Lists all accounts (for health snapshots).
pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<Model>> {
    Ok(Entity::find().order_by_asc(Column::Name).all(db).await?)
}

pub async fn find(db: &DatabaseConnection, id: i32) -> Result<Option<Model>> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

pub async fn find_by_name(db: &DatabaseConnection, name: &str) -> Result<Option<Model>> {
    Ok(Entity::find()
        .filter(Column::Name.eq(name))
        .one(db)
        .await?)
}

/// Stamps last_heartbeat at cycle start.
pub async fn update_heartbeat(db: &DatabaseConnection, id: i32) -> Result<()> {
    let model = ActiveModel {
        id: Set(id),
        last_heartbeat: Set(Some(Utc::now())),
        ..Default::default()
    };
    model.update(db).await?;
    Ok(())
}

/// Stamps last_success and clears last_error at a successful cycle end.
pub async fn update_success(db: &DatabaseConnection, id: i32) -> Result<()> {
    let model = ActiveModel {
        id: Set(id),
        last_success: Set(Some(Utc::now())),
        last_error: Set(None),
        ..Default::default()
    };
    model.update(db).await?;
    Ok(())
}

/// Records last_error (truncated) at a failed cycle end.
pub async fn update_error(db: &DatabaseConnection, id: i32, message: &str) -> Result<()> {
    let model = ActiveModel {
        id: Set(id),
        last_error: Set(Some(truncate(message, MAX_ERROR_LENGTH))),
        ..Default::default()
    };
    model.update(db).await?;
    Ok(())
}

pub async fn set_enabled(db: &DatabaseConnection, id: i32, enabled: bool) -> Result<()> {
    let model = ActiveModel {
        id: Set(id),
        enabled: Set(enabled),
        ..Default::default()
    };
    model.update(db).await?;
    Ok(())
}

/// Persists a refreshed (re-encrypted) access token and its expiry.
pub async fn store_access_token(
    db: &DatabaseConnection,
    id: i32,
    access_token_encrypted: String,
    expiry: chrono::DateTime<Utc>,
) -> Result<()> {
    let model = ActiveModel {
        id: Set(id),
        oauth_access_token_encrypted: Set(Some(access_token_encrypted)),
        oauth_token_expiry: Set(Some(expiry)),
        ..Default::default()
    };
    model.update(db).await?;
    Ok(())
}

/// Deletes an account; its cursor rows cascade, archived messages stay.
pub async fn delete(db: &DatabaseConnection, id: i32) -> Result<u64> {
    let result = Entity::delete_by_id(id).exec(db).await?;
    Ok(result.rows_affected)
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
