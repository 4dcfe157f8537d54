//! Migration to create the system_log table.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SystemLog::Table)
                    .if_not_exists()
                    .col(big_integer(SystemLog::Id).auto_increment().primary_key().take())
                    .col(timestamp_with_time_zone(SystemLog::Timestamp))
                    .col(string(SystemLog::Level))
                    .col(string(SystemLog::Source))
                    .col(string(SystemLog::Message))
                    .col(text(SystemLog::Details))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_system_log_timestamp")
                    .table(SystemLog::Table)
                    .col(SystemLog::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SystemLog {
    Table,
    Id,
    Timestamp,
    Level,
    Source,
    Message,
    Details,
}
