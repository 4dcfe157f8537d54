//! SeaORM migrations for the archive schema.

use sea_orm_migration::prelude::*;

mod m20260301_000001_create_fetch_accounts_table;
mod m20260301_000002_create_fetch_cursors_table;
mod m20260301_000003_create_archived_messages_table;
mod m20260301_000004_create_deletion_stats_table;
mod m20260301_000005_create_system_log_table;
mod m20260301_000006_create_settings_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_fetch_accounts_table::Migration),
            Box::new(m20260301_000002_create_fetch_cursors_table::Migration),
            Box::new(m20260301_000003_create_archived_messages_table::Migration),
            Box::new(m20260301_000004_create_deletion_stats_table::Migration),
            Box::new(m20260301_000005_create_system_log_table::Migration),
            Box::new(m20260301_000006_create_settings_table::Migration),
        ]
    }
}
