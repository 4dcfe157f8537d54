//! Migration to create the fetch_accounts table.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FetchAccounts::Table)
                    .if_not_exists()
                    .col(pk_auto(FetchAccounts::Id))
                    .col(string_uniq(FetchAccounts::Name))
                    .col(string(FetchAccounts::AccountType))
                    .col(string_null(FetchAccounts::Host))
                    .col(integer_null(FetchAccounts::Port))
                    .col(string_null(FetchAccounts::Username))
                    .col(string_null(FetchAccounts::PasswordEncrypted))
                    .col(boolean(FetchAccounts::UseSsl).default(true))
                    .col(boolean(FetchAccounts::RequireStarttls).default(false))
                    .col(string_null(FetchAccounts::OauthClientId))
                    .col(string_null(FetchAccounts::OauthClientSecretEncrypted))
                    .col(string_null(FetchAccounts::OauthRefreshTokenEncrypted))
                    .col(string_null(FetchAccounts::OauthAccessTokenEncrypted))
                    .col(timestamp_with_time_zone_null(FetchAccounts::OauthTokenExpiry))
                    .col(integer(FetchAccounts::PollIntervalSeconds).default(300))
                    .col(boolean(FetchAccounts::DeleteAfterProcessing).default(false))
                    .col(boolean(FetchAccounts::ExpungeDeleted).default(false))
                    .col(boolean(FetchAccounts::Enabled).default(true))
                    .col(timestamp_with_time_zone_null(FetchAccounts::LastHeartbeat))
                    .col(timestamp_with_time_zone_null(FetchAccounts::LastSuccess))
                    .col(string_null(FetchAccounts::LastError))
                    .col(timestamp_with_time_zone(FetchAccounts::CreatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FetchAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FetchAccounts {
    Table,
    Id,
    Name,
    AccountType,
    Host,
    Port,
    Username,
    PasswordEncrypted,
    UseSsl,
    RequireStarttls,
    OauthClientId,
    OauthClientSecretEncrypted,
    OauthRefreshTokenEncrypted,
    OauthAccessTokenEncrypted,
    OauthTokenExpiry,
    PollIntervalSeconds,
    DeleteAfterProcessing,
    ExpungeDeleted,
    Enabled,
    LastHeartbeat,
    LastSuccess,
    LastError,
    CreatedAt,
}
