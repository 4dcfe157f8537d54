//! Migration to create the deletion_stats aggregate table.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeletionStats::Table)
                    .if_not_exists()
                    .col(pk_auto(DeletionStats::Id))
                    .col(date(DeletionStats::DeletionDate))
                    .col(string(DeletionStats::DeletionType))
                    .col(boolean(DeletionStats::DeletedFromMailServer))
                    .col(big_integer(DeletionStats::Count).default(0))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deletion_stats_unique")
                    .table(DeletionStats::Table)
                    .col(DeletionStats::DeletionDate)
                    .col(DeletionStats::DeletionType)
                    .col(DeletionStats::DeletedFromMailServer)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeletionStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeletionStats {
    Table,
    Id,
    DeletionDate,
    DeletionType,
    DeletedFromMailServer,
    Count,
}
