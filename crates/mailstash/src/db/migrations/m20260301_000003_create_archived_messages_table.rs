//! Migration to create the archived_messages table.

use sea_orm::DbBackend;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ArchivedMessages::Table)
                    .if_not_exists()
                    .col(big_integer(ArchivedMessages::Id).auto_increment().primary_key().take())
                    .col(string(ArchivedMessages::AccountName))
                    .col(string(ArchivedMessages::Folder))
                    .col(big_integer(ArchivedMessages::Uid))
                    .col(string_null(ArchivedMessages::ProviderId))
                    .col(string_null(ArchivedMessages::Subject))
                    .col(string_null(ArchivedMessages::Sender))
                    .col(string_null(ArchivedMessages::Recipients))
                    .col(string_null(ArchivedMessages::Date))
                    .col(binary(ArchivedMessages::RawEmail))
                    .col(boolean(ArchivedMessages::Compressed).default(true))
                    .col(boolean(ArchivedMessages::VirusScanned).default(false))
                    .col(boolean(ArchivedMessages::VirusDetected).default(false))
                    .col(string_null(ArchivedMessages::VirusName))
                    .col(timestamp_with_time_zone_null(ArchivedMessages::ScanTimestamp))
                    .col(timestamp_with_time_zone(ArchivedMessages::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Natural key: re-ingestion of the same message is a no-op.
        manager
            .create_index(
                Index::create()
                    .name("idx_archived_messages_natural_key")
                    .table(ArchivedMessages::Table)
                    .col(ArchivedMessages::AccountName)
                    .col(ArchivedMessages::Folder)
                    .col(ArchivedMessages::Uid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Retention sweeps scan by age.
        manager
            .create_index(
                Index::create()
                    .name("idx_archived_messages_created_at")
                    .table(ArchivedMessages::Table)
                    .col(ArchivedMessages::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Full-text search over the denormalized headers is Postgres-only;
        // the SQLite test backend falls back to LIKE queries.
        if manager.get_database_backend() == DbBackend::Postgres {
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE INDEX idx_archived_messages_fts ON archived_messages \
                     USING GIN (to_tsvector('simple', \
                     coalesce(subject, '') || ' ' || coalesce(sender, '') || ' ' || \
                     coalesce(recipients, '')))",
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ArchivedMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ArchivedMessages {
    Table,
    Id,
    AccountName,
    Folder,
    Uid,
    ProviderId,
    Subject,
    Sender,
    Recipients,
    Date,
    RawEmail,
    Compressed,
    VirusScanned,
    VirusDetected,
    VirusName,
    ScanTimestamp,
    CreatedAt,
}
