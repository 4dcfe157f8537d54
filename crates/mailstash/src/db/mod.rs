//! Database module for persistent storage.
//!
//! Uses SeaORM; production runs against Postgres, tests against an
//! in-memory SQLite database. One repository module per table.

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

pub mod account_repo;
pub mod cursor_repo;
pub mod entities;
pub mod error;
pub mod log_repo;
pub mod message_repo;
pub mod migrations;
pub mod settings_repo;
pub mod stats_repo;

pub use error::DatabaseError;

use migrations::Migrator;

/// Connects to the database at `url` and runs all pending migrations.
pub async fn init_database(url: &str) -> Result<DatabaseConnection, DatabaseError> {
    let conn = Database::connect(url).await?;
    Migrator::up(&conn, None).await?;

    log::info!("Database initialized");
    Ok(conn)
}

/// Opens an in-memory SQLite database for testing. Runs all migrations.
pub async fn init_in_memory() -> Result<DatabaseConnection, DatabaseError> {
    init_database("sqlite::memory:").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Statement};

    #[tokio::test]
    async fn test_init_in_memory_creates_schema() {
        let db = init_in_memory().await.unwrap();

        for table in [
            "fetch_accounts",
            "fetch_cursors",
            "archived_messages",
            "deletion_stats",
            "system_log",
            "settings",
        ] {
            let stmt = Statement::from_string(
                db.get_database_backend(),
                format!("SELECT COUNT(*) FROM {}", table),
            );
            db.query_one(stmt)
                .await
                .unwrap_or_else(|e| panic!("table {} missing: {}", table, e));
        }
    }
}
