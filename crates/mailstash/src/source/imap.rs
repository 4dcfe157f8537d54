//! IMAP source adapter.

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use super::error::{Result, SourceError};
use super::{Candidate, Cursor, CursorKind, MailSource};
use crate::db::entities::fetch_account;
use crate::secrets::CredentialVault;

/// Type alias for the underlying async stream (async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by encrypted sessions.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// Session over either an encrypted or a plaintext stream.
///
/// async-imap cannot upgrade a connected stream, so `require_starttls`
/// connects over TLS just like `use_ssl`; plaintext is used only when both
/// flags are off.
enum ImapSession {
    Tls(Session<TlsStream>),
    Plain(Session<AsyncTcpStream>),
}

/// IMAP source for one fetch account.
pub struct ImapSource {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    use_tls: bool,
    session: Option<ImapSession>,
    /// Currently opened folder and whether it was opened writable.
    current_folder: Option<(String, bool)>,
}

impl ImapSource {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
        use_tls: bool,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
            use_tls,
            session: None,
            current_folder: None,
        }
    }

    /// Builds the adapter from a stored account row, decrypting the password.
    pub fn from_account(
        vault: &CredentialVault,
        account: &fetch_account::Model,
    ) -> Result<Self> {
        let host = account
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SourceError::Config("IMAP account has no host".to_string()))?;
        let port = account
            .port
            .ok_or_else(|| SourceError::Config("IMAP account has no port".to_string()))?;
        let username = account
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SourceError::Config("IMAP account has no username".to_string()))?;
        let encrypted = account.password_encrypted.as_deref().ok_or_else(|| {
            SourceError::Config("IMAP account has no stored password".to_string())
        })?;

        let password = vault.decrypt(encrypted)?;

        Ok(Self::new(
            host,
            port as u16,
            username,
            password,
            account.use_ssl || account.require_starttls,
        ))
    }

    /// Connects and authenticates if not already connected.
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        info!("Connecting to IMAP server at {}", addr);

        let std_stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        let session = if self.use_tls {
            let tls = TlsConnector::new();
            let tls_stream = tls
                .connect(&self.host, tcp_stream)
                .await
                .map_err(|e| SourceError::Tls(e.to_string()))?;

            let client = async_imap::Client::new(tls_stream);
            let session = client
                .login(&self.username, self.password.expose_secret())
                .await
                .map_err(|(e, _)| SourceError::AuthenticationFailed(e.to_string()))?;
            ImapSession::Tls(session)
        } else {
            warn!("Connecting to {} without TLS", addr);
            let client = async_imap::Client::new(tcp_stream);
            let session = client
                .login(&self.username, self.password.expose_secret())
                .await
                .map_err(|(e, _)| SourceError::AuthenticationFailed(e.to_string()))?;
            ImapSession::Plain(session)
        };

        info!("Successfully authenticated to IMAP server {}", addr);
        self.session = Some(session);
        self.current_folder = None;
        Ok(())
    }

    /// Opens `folder` if not already open in the requested mode. Read-only
    /// opens use EXAMINE so polling never sets \Seen flags.
    async fn ensure_folder(&mut self, folder: &str, writable: bool) -> Result<()> {
        if self
            .current_folder
            .as_ref()
            .is_some_and(|(name, w)| name == folder && *w == writable)
        {
            return Ok(());
        }

        let session = self.session_mut()?;
        let result = match (session, writable) {
            (ImapSession::Tls(s), false) => s.examine(folder).await.map(|_| ()),
            (ImapSession::Tls(s), true) => s.select(folder).await.map(|_| ()),
            (ImapSession::Plain(s), false) => s.examine(folder).await.map(|_| ()),
            (ImapSession::Plain(s), true) => s.select(folder).await.map(|_| ()),
        };

        result.map_err(|e| classify_mailbox_error(folder, e))?;
        self.current_folder = Some((folder.to_string(), writable));
        debug!("Opened folder '{}' (writable={})", folder, writable);
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| SourceError::ConnectionFailed("Not connected".to_string()))
    }
}

#[async_trait]
impl MailSource for ImapSource {
    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Uid
    }

    async fn test_connection(&mut self) -> Result<()> {
        self.connect().await?;
        self.close().await
    }

    async fn folders(&mut self) -> Result<Vec<String>> {
        self.connect().await?;

        let names = match self.session_mut()? {
            ImapSession::Tls(s) => {
                let stream = s
                    .list(Some(""), Some("*"))
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                stream
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?
            }
            ImapSession::Plain(s) => {
                let stream = s
                    .list(Some(""), Some("*"))
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                stream
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?
            }
        };

        let folders: Vec<String> = names
            .iter()
            .filter(|name| {
                !name
                    .attributes()
                    .iter()
                    .any(|attr| matches!(attr, async_imap::types::NameAttribute::NoSelect))
            })
            .map(|name| name.name().to_string())
            .collect();

        debug!("Listed {} selectable folders", folders.len());
        Ok(folders)
    }

    async fn list_new(&mut self, folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>> {
        let last_uid = match cursor {
            Cursor::Uid(uid) => *uid,
            Cursor::Token(_) => {
                return Err(SourceError::Config(
                    "IMAP folders track a UID cursor, got a sync token".to_string(),
                ))
            }
        };

        self.connect().await?;
        self.ensure_folder(folder, false).await?;

        let query = search_query(last_uid);
        debug!("Searching '{}' with query: {}", folder, query);

        let uids = match self.session_mut()? {
            ImapSession::Tls(s) => s
                .uid_search(&query)
                .await
                .map_err(|e| SourceError::Protocol(e.to_string()))?,
            ImapSession::Plain(s) => s
                .uid_search(&query)
                .await
                .map_err(|e| SourceError::Protocol(e.to_string()))?,
        };

        let candidates = new_candidates(uids.into_iter().collect(), last_uid);
        debug!(
            "Found {} new messages in '{}' above UID {}",
            candidates.len(),
            folder,
            last_uid
        );
        Ok(candidates)
    }

    async fn fetch_raw(&mut self, folder: &str, candidate: &Candidate) -> Result<Vec<u8>> {
        self.connect().await?;
        self.ensure_folder(folder, false).await?;

        debug!("Fetching message UID {}", candidate.provider_id);

        // BODY.PEEK[] keeps the message unread on the server.
        let fetches = match self.session_mut()? {
            ImapSession::Tls(s) => {
                let stream = s
                    .uid_fetch(&candidate.provider_id, "(UID BODY.PEEK[])")
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                stream
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?
            }
            ImapSession::Plain(s) => {
                let stream = s
                    .uid_fetch(&candidate.provider_id, "(UID BODY.PEEK[])")
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                stream
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?
            }
        };

        let fetch = fetches.first().ok_or_else(|| SourceError::Message {
            id: candidate.provider_id.clone(),
            reason: "message not found on server".to_string(),
        })?;

        let body = fetch.body().ok_or_else(|| SourceError::Message {
            id: candidate.provider_id.clone(),
            reason: "message has no body".to_string(),
        })?;

        Ok(body.to_vec())
    }

    async fn delete_or_trash(
        &mut self,
        folder: &str,
        candidate: &Candidate,
        expunge: bool,
    ) -> Result<()> {
        self.connect().await?;
        self.ensure_folder(folder, true).await?;

        debug!(
            "Flagging UID {} as \\Deleted (expunge={})",
            candidate.provider_id, expunge
        );

        match self.session_mut()? {
            ImapSession::Tls(s) => {
                let updates = s
                    .uid_store(&candidate.provider_id, "+FLAGS (\\Deleted)")
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                updates
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                if expunge {
                    let expunged = s
                        .expunge()
                        .await
                        .map_err(|e| SourceError::Protocol(e.to_string()))?;
                    expunged
                        .try_collect::<Vec<_>>()
                        .await
                        .map_err(|e| SourceError::Protocol(e.to_string()))?;
                }
            }
            ImapSession::Plain(s) => {
                let updates = s
                    .uid_store(&candidate.provider_id, "+FLAGS (\\Deleted)")
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                updates
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| SourceError::Protocol(e.to_string()))?;
                if expunge {
                    let expunged = s
                        .expunge()
                        .await
                        .map_err(|e| SourceError::Protocol(e.to_string()))?;
                    expunged
                        .try_collect::<Vec<_>>()
                        .await
                        .map_err(|e| SourceError::Protocol(e.to_string()))?;
                }
            }
        }

        Ok(())
    }

    async fn next_cursor(&mut self, _folder: &str) -> Result<Option<Cursor>> {
        // UID cursors advance per message in the pipeline.
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            info!("Disconnecting from IMAP server {}", self.host);
            let result = match session {
                ImapSession::Tls(mut s) => s.logout().await,
                ImapSession::Plain(mut s) => s.logout().await,
            };
            if let Err(e) = result {
                debug!("IMAP logout failed (ignored): {}", e);
            }
        }
        self.current_folder = None;
        Ok(())
    }
}

impl Drop for ImapSource {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapSource dropped without explicit close - session will be closed");
        }
    }
}

/// Builds the UID SEARCH query for everything above `last_uid`.
fn search_query(last_uid: i64) -> String {
    if last_uid > 0 {
        format!("UID {}:*", last_uid + 1)
    } else {
        "ALL".to_string()
    }
}

/// Filters and orders a search result into candidates above the cursor.
/// Servers answer `UID n:*` with at least the last message even when every
/// UID is below n, so the explicit filter is required for correctness.
fn new_candidates(mut uids: Vec<u32>, last_uid: i64) -> Vec<Candidate> {
    uids.sort_unstable();
    uids.dedup();
    uids.into_iter()
        .filter(|&uid| (uid as i64) > last_uid)
        .map(Candidate::from_uid)
        .collect()
}

/// Maps EXAMINE/SELECT failures: a missing mailbox is skippable, everything
/// else is a protocol error.
fn classify_mailbox_error(folder: &str, err: async_imap::error::Error) -> SourceError {
    let text = err.to_string();
    if text.contains("Mailbox doesn't exist") || text.contains("NO") {
        SourceError::FolderNotFound(folder.to_string())
    } else {
        SourceError::Protocol(text)
    }
}
