//! Fetch cursor repository — per-(account, folder) fetch positions.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, IntoActiveModel};

use super::entities::fetch_cursor::{ActiveModel, Column, Entity, Model};
use super::error::Result;

pub async fn find(
    db: &DatabaseConnection,
    account_id: i32,
    folder: &str,
) -> Result<Option<Model>> {
    Ok(Entity::find()
        .filter(Column::AccountId.eq(account_id))
        .filter(Column::Folder.eq(folder))
        .one(db)
        .await?)
}

/// Returns the last ingested UID for an IMAP folder, 0 when the folder has
/// never been fetched.
pub async fn last_uid(db: &DatabaseConnection, account_id: i32, folder: &str) -> Result<i64> {
    Ok(find(db, account_id, folder).await?.map_or(0, |c| c.last_uid))
}

/// Returns the delta-sync token for a folder, None when a full resync is due.
pub async fn sync_token(
    db: &DatabaseConnection,
    account_id: i32,
    folder: &str,
) -> Result<Option<String>> {
    Ok(find(db, account_id, folder)
        .await?
        .and_then(|c| c.last_sync_token))
}

/// Advances the UID cursor. Monotonic: a lower or equal UID is a no-op, so a
/// retried batch can never move the cursor backwards.
pub async fn advance_uid(
    db: &DatabaseConnection,
    account_id: i32,
    folder: &str,
    uid: i64,
) -> Result<()> {
    match find(db, account_id, folder).await? {
        Some(existing) => {
            if uid > existing.last_uid {
                let mut model = existing.into_active_model();
                model.last_uid = Set(uid);
                model.updated_at = Set(Utc::now());
                model.update(db).await?;
            }
        }
        None => {
            let model = ActiveModel {
                account_id: Set(account_id),
                folder: Set(folder.to_string()),
                last_uid: Set(uid),
                last_sync_token: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            };
            model.insert(db).await?;
        }
    }
    Ok(())
}

/// Replaces the delta-sync token for a folder.
pub async fn set_sync_token(
    db: &DatabaseConnection,
    account_id: i32,
    folder: &str,
    token: &str,
) -> Result<()> {
    match find(db, account_id, folder).await? {
        Some(existing) => {
            let mut model = existing.into_active_model();
            model.last_sync_token = Set(Some(token.to_string()));
            model.updated_at = Set(Utc::now());
            model.update(db).await?;
        }
        None => {
            let model = ActiveModel {
                account_id: Set(account_id),
                folder: Set(folder.to_string()),
                last_uid: Set(0),
                last_sync_token: Set(Some(token.to_string())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            };
            model.insert(db).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::account_repo::{self, NewAccount};
    use crate::db::init_in_memory;

    async fn setup() -> (DatabaseConnection, i32) {
        let db = init_in_memory().await.unwrap();
        let account = account_repo::create(
            &db,
            NewAccount {
                name: "cursor-test".to_string(),
                account_type: "imap".to_string(),
                poll_interval_seconds: 300,
                enabled: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (db, account.id)
    }

    #[tokio::test]
    async fn test_default_cursor_is_zero() {
        let (db, id) = setup().await;
        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 0);
        assert_eq!(sync_token(&db, id, "INBOX").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_advance_uid_is_monotonic() {
        let (db, id) = setup().await;

        advance_uid(&db, id, "INBOX", 100).await.unwrap();
        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 100);

        // Going backwards is a no-op.
        advance_uid(&db, id, "INBOX", 50).await.unwrap();
        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 100);

        advance_uid(&db, id, "INBOX", 101).await.unwrap();
        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 101);
    }

    #[tokio::test]
    async fn test_cursors_are_per_folder() {
        let (db, id) = setup().await;

        advance_uid(&db, id, "INBOX", 10).await.unwrap();
        advance_uid(&db, id, "Archive", 99).await.unwrap();

        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 10);
        assert_eq!(last_uid(&db, id, "Archive").await.unwrap(), 99);
        assert_eq!(last_uid(&db, id, "Sent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_token_roundtrip() {
        let (db, id) = setup().await;

        set_sync_token(&db, id, "INBOX", "history-12345").await.unwrap();
        assert_eq!(
            sync_token(&db, id, "INBOX").await.unwrap().as_deref(),
            Some("history-12345")
        );

        set_sync_token(&db, id, "INBOX", "history-67890").await.unwrap();
        assert_eq!(
            sync_token(&db, id, "INBOX").await.unwrap().as_deref(),
            Some("history-67890")
        );
    }

    #[tokio::test]
    async fn test_uid_and_token_do_not_interfere() {
        let (db, id) = setup().await;

        set_sync_token(&db, id, "INBOX", "tok").await.unwrap();
        advance_uid(&db, id, "INBOX", 5).await.unwrap();

        assert_eq!(last_uid(&db, id, "INBOX").await.unwrap(), 5);
        assert_eq!(
            sync_token(&db, id, "INBOX").await.unwrap().as_deref(),
            Some("tok")
        );
    }
}
