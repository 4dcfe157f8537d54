use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailstashError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Source error: {0}")]
    Source(#[from] crate::source::SourceError),
}

pub type Result<T> = std::result::Result<T, MailstashError>;
