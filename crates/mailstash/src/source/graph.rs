//! Office 365 source adapter over the Microsoft Graph API.
//!
//! Delta sync follows `@odata.deltaLink`/`@odata.nextLink` chains on the
//! inbox; records carrying `@removed` are upstream deletions and are not
//! mirrored (archive-only). Raw MIME comes from the `$value` endpoint;
//! deletion moves messages to Deleted Items rather than erasing them.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{Result, SourceError};
use super::{Candidate, Cursor, CursorKind, MailSource};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0/me";

/// Page size for full-sync message listing.
const PAGE_SIZE: u32 = 100;

/// Office 365 Graph source for one fetch account.
pub struct GraphSource {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    /// Delta link captured while walking the last delta response.
    latest_delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: Option<String>,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphList {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

impl GraphSource {
    pub fn new(access_token: SecretString) -> Self {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    /// Base URL override for tests.
    pub fn with_base_url(access_token: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token,
            latest_delta_link: None,
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?;
        Ok(response)
    }

    fn check_status(response: &reqwest::Response) -> Result<()> {
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SourceError::AuthenticationFailed(format!(
                    "Graph API returned {}",
                    response.status()
                )))
            }
            s => Err(SourceError::Protocol(format!("Graph API returned {}", s))),
        }
    }

    /// Walks a delta-link chain, collecting additions and the new delta link.
    /// A 410 Gone means the delta token expired; fall back to a full listing.
    async fn list_delta(&mut self, delta_link: &str) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut ignored_removals = 0usize;
        let mut url = delta_link.to_string();

        loop {
            let response = self.get(&url).await?;
            if response.status() == StatusCode::GONE {
                warn!("Graph delta link expired, falling back to full sync");
                return self.list_full().await;
            }
            Self::check_status(&response)?;

            let list = response.json::<GraphList>().await?;
            let (added, removed) = partition_delta(&list);
            ignored_removals += removed;
            candidates.extend(added);

            if let Some(delta) = list.delta_link {
                self.latest_delta_link = Some(delta);
                break;
            }
            match list.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        if ignored_removals > 0 {
            debug!(
                "Ignoring {} upstream removals reported by Graph delta",
                ignored_removals
            );
        }

        Ok(candidates)
    }

    /// Full inbox listing, paged with $top/$skip.
    async fn list_full(&self) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut skip = 0u32;

        loop {
            let url = format!(
                "{}/mailFolders/inbox/messages?$top={}&$skip={}&$select=id,receivedDateTime",
                self.base_url, PAGE_SIZE, skip
            );
            let response = self.get(&url).await?;
            Self::check_status(&response)?;

            let list = response.json::<GraphList>().await?;
            let page_len = list.value.len();
            candidates.extend(
                list.value
                    .into_iter()
                    .filter_map(|m| m.id)
                    .map(Candidate::from_provider_id),
            );

            if page_len < PAGE_SIZE as usize {
                break;
            }
            skip += PAGE_SIZE;
        }

        Ok(candidates)
    }

    /// Fetches a fresh delta link for the inbox.
    async fn fresh_delta_link(&self) -> Result<Option<String>> {
        let url = format!(
            "{}/mailFolders/inbox/messages/delta?$select=id,receivedDateTime&$top=1",
            self.base_url
        );
        let response = self.get(&url).await?;
        Self::check_status(&response)?;

        let mut list = response.json::<GraphList>().await?;
        // Drain nextLink pages until the server hands out the delta link.
        while list.delta_link.is_none() {
            let Some(next) = list.next_link.clone() else {
                return Ok(None);
            };
            let response = self.get(&next).await?;
            Self::check_status(&response)?;
            list = response.json::<GraphList>().await?;
        }
        Ok(list.delta_link)
    }
}

#[async_trait]
impl MailSource for GraphSource {
    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Token
    }

    async fn test_connection(&mut self) -> Result<()> {
        let response = self
            .get(&format!("{}?$select=mail,userPrincipalName", self.base_url))
            .await?;
        Self::check_status(&response)
    }

    async fn folders(&mut self) -> Result<Vec<String>> {
        Ok(vec!["INBOX".to_string()])
    }

    async fn list_new(&mut self, _folder: &str, cursor: &Cursor) -> Result<Vec<Candidate>> {
        let token = match cursor {
            Cursor::Token(token) => token.as_deref(),
            Cursor::Uid(_) => {
                return Err(SourceError::Config(
                    "Graph folders track a sync token, got a UID cursor".to_string(),
                ))
            }
        };

        match token {
            Some(delta_link) => {
                let link = delta_link.to_string();
                self.list_delta(&link).await
            }
            None => self.list_full().await,
        }
    }

    async fn fetch_raw(&mut self, _folder: &str, candidate: &Candidate) -> Result<Vec<u8>> {
        let url = format!("{}/messages/{}/$value", self.base_url, candidate.provider_id);
        let response = self.get(&url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Message {
                id: candidate.provider_id.clone(),
                reason: "message no longer exists".to_string(),
            });
        }
        Self::check_status(&response)?;

        Ok(response.bytes().await?.to_vec())
    }

    async fn delete_or_trash(
        &mut self,
        _folder: &str,
        candidate: &Candidate,
        _expunge: bool,
    ) -> Result<()> {
        // Move to Deleted Items; tenant retention policy controls erasure.
        let url = format!("{}/messages/{}/move", self.base_url, candidate.provider_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&serde_json::json!({ "destinationId": "deleteditems" }))
            .send()
            .await?;
        Self::check_status(&response)
    }

    async fn next_cursor(&mut self, _folder: &str) -> Result<Option<Cursor>> {
        if let Some(delta) = self.latest_delta_link.take() {
            return Ok(Some(Cursor::Token(Some(delta))));
        }
        Ok(self
            .fresh_delta_link()
            .await?
            .map(|link| Cursor::Token(Some(link))))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Splits a delta page into ingestable candidates and the count of upstream
/// removals (which are ignored, never mirrored).
fn partition_delta(list: &GraphList) -> (Vec<Candidate>, usize) {
    let mut added = Vec::new();
    let mut removed = 0usize;

    for message in &list.value {
        if message.removed.is_some() {
            removed += 1;
            continue;
        }
        if let Some(id) = &message.id {
            added.push(Candidate::from_provider_id(id.clone()));
        }
    }

    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_delta_filters_removed() {
        let payload = serde_json::json!({
            "value": [
                {"id": "msg-1"},
                {"id": "msg-2", "@removed": {"reason": "deleted"}},
                {"id": "msg-3"},
                {"@removed": {"reason": "changed"}}
            ],
            "@odata.deltaLink": "https://graph.microsoft.com/delta?token=abc"
        });

        let list: GraphList = serde_json::from_value(payload).unwrap();
        let (added, removed) = partition_delta(&list);

        let ids: Vec<&str> = added.iter().map(|c| c.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["msg-1", "msg-3"]);
        assert_eq!(removed, 2);
        assert_eq!(
            list.delta_link.as_deref(),
            Some("https://graph.microsoft.com/delta?token=abc")
        );
    }

    #[test]
    fn test_graph_list_parses_next_link() {
        let payload = serde_json::json!({
            "value": [{"id": "a"}],
            "@odata.nextLink": "https://graph.microsoft.com/page2"
        });
        let list: GraphList = serde_json::from_value(payload).unwrap();
        assert_eq!(list.value.len(), 1);
        assert_eq!(
            list.next_link.as_deref(),
            Some("https://graph.microsoft.com/page2")
        );
        assert!(list.delta_link.is_none());
    }

    #[test]
    fn test_list_new_rejects_uid_cursor() {
        let mut source = GraphSource::new(SecretString::from("token"));
        let result = futures_util::FutureExt::now_or_never(
            source.list_new("INBOX", &Cursor::Uid(1)),
        )
        .expect("cursor kind check is synchronous");
        assert!(matches!(result, Err(SourceError::Config(_))));
    }
}
