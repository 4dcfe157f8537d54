//! Gmail API source adapter.
//!
//! Polls `gmail.googleapis.com` with a bearer token. Delta sync uses the
//! history API keyed by the profile's historyId; without a token the full
//! INBOX listing is paged through. Upstream deletions reported by the
//! history API are not mirrored (archive-only).

use async_trait::async_trait;
use base64::Engine;
use log::{debug, warn};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{Result, SourceError};
use super::{Candidate, Cursor, CursorKind, MailSource};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Page size for full-sync message listing.
const PAGE_SIZE: u32 = 100;

/// Gmail source for one fetch account.
pub struct GmailSource {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    #[serde(rename = "messagesAdded", default)]
    messages_added: Vec<HistoryMessageAdded>,
    #[serde(rename = "messagesDeleted", default)]
    messages_deleted: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryList {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "historyId")]
    history_id: Option<String>,
}

impl GmailSource {
    pub fn new(access_token: SecretString) -> Self {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    /// Base URL override for tests.
    pub fn with_base_url(access_token: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token,
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await?;
        Ok(response)
    }

    fn check_status(response: &reqwest::Response) -> Result<()> {
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                SourceError::AuthenticationFailed(format!("Gmail API returned {}", response.status())),
            ),
            s => Err(SourceError::Protocol(format!("Gmail API returned {}", s))),
        }
    }

    async fn profile(&self) -> Result<Profile> {
        let response = self.get(&format!("{}/profile", self.base_url), &[]).await?;
        Self::check_status(&response)?;
        Ok(response.json::<Profile>().await?)
    }

    /// Incremental listing via the history API. A 404 means the history id
    /// expired; fall back to a full listing (dedupe absorbs the overlap).
    async fn list_since_history(&self, start_history_id: &str) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut page_token: Option<String> = None;
        let mut ignored_deletions = 0usize;

        loop {
            let mut query = vec![("startHistoryId", start_history_id.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self.get(&format!("{}/history", self.base_url), &query).await?;
            if response.status() == StatusCode::NOT_FOUND {
                warn!("Gmail history id {} expired, falling back to full sync", start_history_id);
                return self.list_full().await;
            }
            Self::check_status(&response)?;

            let list = response.json::<HistoryList>().await?;
            for record in &list.history {
                ignored_deletions += record.messages_deleted.len();
                for added in &record.messages_added {
                    candidates.push(Candidate::from_provider_id(added.message.id.clone()));
                }
            }

            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if ignored_deletions > 0 {
            debug!(
                "Ignoring {} upstream deletions reported by Gmail history",
                ignored_deletions
            );
        }

        Ok(candidates)
    }

    /// Full INBOX listing, paged.
    async fn list_full(&self) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("maxResults", PAGE_SIZE.to_string()),
                ("labelIds", "INBOX".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self.get(&format!("{}/messages", self.base_url), &query).await?;
            Self::check_status(&response)?;

            let list = response.json::<MessageList>().await?;
            candidates.extend(
                list.messages
                    .into_iter()
                    .map(|m| Candidate::from_provider_id(m.id)),
            );

            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(candidates)
    }
}

#[async_trait]
impl MailSource for GmailSource {
    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Token
    }

    async fn test_connection(&mut self) -> Result<()> {
        self.profile().await.map(|_| ())
    }

    async fn folders(&mut self) -> Result<Vec<String>> {
        // Gmail uses labels; the archive polls INBOX.
        Ok(vec!["INBOX".to_string()])
    }

    async fn list_new(&mut self, _folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>> {
        let token = match cursor {
            Cursor::Token(token) => token.as_deref(),
            Cursor::Uid(_) => {
                return Err(SourceError::Config(
                    "Gmail folders track a sync token, got a UID cursor".to_string(),
                ))
            }
        };

        match token {
            Some(history_id) => self.list_since_history(history_id).await,
            None => self.list_full().await,
        }
    }

    async fn fetch_raw(&mut self, _folder: &str, candidate: &Candidate) -> Result<Vec<u8>> {
        let url = format!("{}/messages/{}", self.base_url, candidate.provider_id);
        let response = self.get(&url, &[("format", "raw".to_string())]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Message {
                id: candidate.provider_id.clone(),
                reason: "message no longer exists".to_string(),
            });
        }
        Self::check_status(&response)?;

        let message = response.json::<RawMessage>().await?;
        let raw = message.raw.ok_or_else(|| SourceError::Message {
            id: candidate.provider_id.clone(),
            reason: "response has no raw payload".to_string(),
        })?;

        decode_base64url(&raw).map_err(|e| SourceError::Message {
            id: candidate.provider_id.clone(),
            reason: format!("invalid base64url payload: {}", e),
        })
    }

    async fn delete_or_trash(
        &mut self,
        _folder: &str,
        candidate: &Candidate,
        _expunge: bool,
    ) -> Result<()> {
        // No permanent delete: Gmail's trash retention applies.
        let url = format!("{}/messages/{}/trash", self.base_url, candidate.provider_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?;
        Self::check_status(&response)
    }

    async fn next_cursor(&mut self, _folder: &str) -> Result<Option<Cursor>> {
        let profile = self.profile().await?;
        Ok(profile.history_id.map(|id| Cursor::Token(Some(id))))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Decodes Gmail's base64url raw payload, tolerating missing padding.
fn decode_base64url(raw: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(raw.trim_end_matches('='))
}
