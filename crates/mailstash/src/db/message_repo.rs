//! Archived message repository — idempotent storage and retention queries.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ConnectionTrait, DatabaseConnection, PaginatorTrait, QueryOrder, QuerySelect,
};

use super::entities::archived_message::{ActiveModel, Column, Entity, Model};
use super::error::{DatabaseError, Result};

/// Input for storing one message. `raw` is the uncompressed RFC822 bytes as
/// fetched from the source.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub account_name: String,
    pub folder: String,
    pub uid: i64,
    pub provider_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Option<String>,
    pub date: Option<String>,
    pub raw: Vec<u8>,
    pub virus_scanned: bool,
    pub virus_detected: bool,
    pub virus_name: Option<String>,
    pub scan_timestamp: Option<DateTime<Utc>>,
}

/// Inserts a message keyed by (account_name, folder, uid), gzip-compressing
/// the raw bytes. Returns `true` when a row was inserted, `false` when the
/// natural key already existed (idempotent re-ingestion).
pub async fn insert(db: &DatabaseConnection, message: NewMessage) -> Result<bool> {
    let compressed = gzip_compress(&message.raw)?;

    let model = ActiveModel {
        account_name: Set(message.account_name),
        folder: Set(message.folder),
        uid: Set(message.uid),
        provider_id: Set(message.provider_id),
        subject: Set(message.subject),
        sender: Set(message.sender),
        recipients: Set(message.recipients),
        date: Set(message.date),
        raw_email: Set(compressed),
        compressed: Set(true),
        virus_scanned: Set(message.virus_scanned),
        virus_detected: Set(message.virus_detected),
        virus_name: Set(message.virus_name),
        scan_timestamp: Set(message.scan_timestamp),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    let rows = Entity::insert(model)
        .on_conflict(
            OnConflict::columns([Column::AccountName, Column::Folder, Column::Uid])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(rows > 0)
}

pub async fn find(db: &DatabaseConnection, id: i64) -> Result<Option<Model>> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

pub async fn find_by_natural_key(
    db: &DatabaseConnection,
    account_name: &str,
    folder: &str,
    uid: i64,
) -> Result<Option<Model>> {
    Ok(Entity::find()
        .filter(Column::AccountName.eq(account_name))
        .filter(Column::Folder.eq(folder))
        .filter(Column::Uid.eq(uid))
        .one(db)
        .await?)
}

/// Returns the stored raw RFC822 bytes, decompressed.
pub fn raw_bytes(message: &Model) -> Result<Vec<u8>> {
    if !message.compressed {
        return Ok(message.raw_email.clone());
    }
    gzip_decompress(&message.raw_email).map_err(|e| DatabaseError::Decompression {
        id: message.id,
        reason: e.to_string(),
    })
}

/// Messages older than `cutoff`, oldest first (retention sweep candidates).
pub async fn find_older_than(
    db: &DatabaseConnection,
    cutoff: DateTime<Utc>,
    limit: u64,
) -> Result<Vec<Model>> {
    Ok(Entity::find()
        .filter(Column::CreatedAt.lt(cutoff))
        .order_by_asc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

/// Deletes messages by id, returning the number of rows removed.
pub async fn delete_by_ids(db: &DatabaseConnection, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = Entity::delete_many()
        .filter(Column::Id.is_in(ids.iter().copied()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub async fn count(db: &DatabaseConnection) -> Result<u64> {
    Ok(Entity::find().count(db).await?)
}

/// Searches subject/sender/recipients. Postgres uses the tsvector GIN
/// index; other backends fall back to LIKE matching.
pub async fn search(
    db: &DatabaseConnection,
    query: &str,
    limit: u64,
) -> Result<Vec<Model>> {
    if db.get_database_backend() == sea_orm::DbBackend::Postgres {
        let stmt = sea_orm::Statement::from_sql_and_values(
            sea_orm::DbBackend::Postgres,
            "SELECT * FROM archived_messages WHERE \
             to_tsvector('simple', coalesce(subject, '') || ' ' || coalesce(sender, '') \
             || ' ' || coalesce(recipients, '')) @@ plainto_tsquery('simple', $1) \
             ORDER BY created_at DESC LIMIT $2",
            [query.into(), (limit as i64).into()],
        );
        return Ok(Entity::find().from_raw_sql(stmt).all(db).await?);
    }

    let pattern = format!("%{}%", query);
    Ok(Entity::find()
        .filter(
            sea_orm::Condition::any()
                .add(Column::Subject.like(pattern.as_str()))
                .add(Column::Sender.like(pattern.as_str()))
                .add(Column::Recipients.like(pattern.as_str())),
        )
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

fn gzip_compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| DatabaseError::Orm(sea_orm::DbErr::Custom(format!("gzip: {}", e))))
}

fn gzip_decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
