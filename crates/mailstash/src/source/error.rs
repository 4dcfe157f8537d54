//! Source adapter error types.

use thiserror::Error;

/// Errors that can occur while talking to a mail source.
///
/// Variants split into three severities the pipeline acts on: account
/// configuration problems, connection-level failures that abort the current
/// cycle, and message-level failures that skip a single message.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Malformed account configuration or unusable credentials. The account
    /// is skipped until fixed; other accounts are unaffected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to reach the server (TCP, DNS, timeouts).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// OAuth2 token refresh failed.
    #[error("OAuth2 token refresh failed: {0}")]
    OAuth(String),

    /// Folder missing on the server; the pipeline skips it and continues
    /// with the account's other folders.
    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    /// Protocol-level failure (unexpected response, broken stream).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failure scoped to a single message; the batch continues.
    #[error("Message {id}: {reason}")]
    Message { id: String, reason: String },
}

impl SourceError {
    /// True when the error only affects one message and the batch should
    /// continue. Everything else aborts the account's cycle (except
    /// `FolderNotFound`, which skips just that folder).
    pub fn is_message_level(&self) -> bool {
        matches!(self, SourceError::Message { .. })
    }

    /// Wraps an error as message-scoped.
    pub fn for_message(id: impl Into<String>, source: SourceError) -> Self {
        SourceError::Message {
            id: id.into(),
            reason: source.to_string(),
        }
    }
}

impl From<async_native_tls::Error> for SourceError {
    fn from(err: async_native_tls::Error) -> Self {
        SourceError::Tls(err.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SourceError::ConnectionFailed(err.to_string())
        } else {
            SourceError::Protocol(err.to_string())
        }
    }
}

impl From<crate::secrets::SecretError> for SourceError {
    fn from(err: crate::secrets::SecretError) -> Self {
        SourceError::Config(err.to_string())
    }
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
