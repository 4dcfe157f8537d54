//! Migration to create the fetch_cursors table.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FetchCursors::Table)
                    .if_not_exists()
                    .col(pk_auto(FetchCursors::Id))
                    .col(integer(FetchCursors::AccountId))
                    .col(string(FetchCursors::Folder))
                    .col(big_integer(FetchCursors::LastUid).default(0))
                    .col(string_null(FetchCursors::LastSyncToken))
                    .col(timestamp_with_time_zone(FetchCursors::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_fetch_cursors_account")
                            .from(FetchCursors::Table, FetchCursors::AccountId)
                            .to(FetchAccounts::Table, FetchAccounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One cursor row per (account, folder)
        manager
            .create_index(
                Index::create()
                    .name("idx_fetch_cursors_unique")
                    .table(FetchCursors::Table)
                    .col(FetchCursors::AccountId)
                    .col(FetchCursors::Folder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FetchCursors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FetchCursors {
    Table,
    Id,
    AccountId,
    Folder,
    LastUid,
    LastSyncToken,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FetchAccounts {
    Table,
    Id,
}
