//! Database error types.

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Orm(#[from] sea_orm::DbErr),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Failed to decompress stored message {id}: {reason}")]
    Decompression { id: i64, reason: String },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
