//! OAuth2 token handling for Gmail and Office 365 accounts.
//!
//! Before each cycle the stored access token is checked against its expiry;
//! an expired token is refreshed with the account's refresh token and the
//! new token is re-encrypted and persisted. Refresh failure is an
//! account-level error and never affects other accounts.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use sea_orm::DatabaseConnection;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{Result, SourceError};
use crate::db::account_repo;
use crate::db::entities::fetch_account;
use crate::secrets::CredentialVault;

/// Maximum length for sanitized error bodies to prevent log flooding.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Refresh tokens this close to expiry (seconds).
const EXPIRY_BUFFER_SECONDS: i64 = 60;

/// Access-token lifetime assumed when the endpoint omits expires_in.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// OAuth2 provider presets with known token endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Gmail,
    Microsoft,
}

impl OAuthProvider {
    /// Provider serving an account type, None for password auth.
    pub fn for_account_type(account_type: &str) -> Option<Self> {
        match account_type {
            "gmail" => Some(OAuthProvider::Gmail),
            "o365" => Some(OAuthProvider::Microsoft),
            _ => None,
        }
    }

    /// Token endpoint URL for this provider.
    pub fn token_url(&self) -> &'static str {
        match self {
            OAuthProvider::Gmail => "https://oauth2.googleapis.com/token",
            OAuthProvider::Microsoft => {
                "https://login.microsoftonline.com/common/oauth2/v2.0/token"
            }
        }
    }
}

/// Response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Lifetime in seconds of the access token.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// A rotated refresh token (not always provided).
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry computed from now.
    pub fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN) as i64)
    }
}

/// True when the stored token is missing, unparseable or expires within the
/// buffer window.
pub fn needs_refresh(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expiry {
        Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_BUFFER_SECONDS),
        None => true,
    }
}

/// Sanitizes an OAuth error response body by truncating to a reasonable
/// length, keeping useful context out of token-bearing responses.
fn sanitize_oauth_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LENGTH])
    } else {
        body.to_string()
    }
}

/// Exchanges a refresh token for a new access token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    refresh_token: &SecretString,
    client_id: &str,
    client_secret: &SecretString,
) -> Result<TokenResponse> {
    debug!("Refreshing OAuth2 access token via {}", token_url);

    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.expose_secret()),
        ("client_id", client_id),
        ("client_secret", client_secret.expose_secret()),
    ];

    let response = http
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| SourceError::OAuth(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::OAuth(format!(
            "token endpoint returned {}: {}",
            status,
            sanitize_oauth_error_body(&body)
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| SourceError::OAuth(format!("invalid token response: {}", e)))
}

/// Returns a valid access token for an OAuth account, refreshing and
/// persisting it when the stored one is stale.
pub async fn ensure_access_token(
    db: &DatabaseConnection,
    vault: &CredentialVault,
    account: &fetch_account::Model,
) -> Result<SecretString> {
    let provider = OAuthProvider::for_account_type(&account.account_type).ok_or_else(|| {
        SourceError::Config(format!(
            "Account type '{}' does not use OAuth",
            account.account_type
        ))
    })?;

    // Reuse the stored token while it is still comfortably valid.
    if !needs_refresh(account.oauth_token_expiry, Utc::now()) {
        if let Some(encrypted) = account.oauth_access_token_encrypted.as_deref() {
            return Ok(vault.decrypt(encrypted)?);
        }
    }

    let refresh_encrypted = account
        .oauth_refresh_token_encrypted
        .as_deref()
        .ok_or_else(|| {
            SourceError::Config("OAuth account has no stored refresh token".to_string())
        })?;
    let refresh_token = vault.decrypt(refresh_encrypted)?;

    let client_id = account
        .oauth_client_id
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SourceError::Config("OAuth account has no client id".to_string()))?;
    let secret_encrypted = account
        .oauth_client_secret_encrypted
        .as_deref()
        .ok_or_else(|| {
            SourceError::Config("OAuth account has no stored client secret".to_string())
        })?;
    let client_secret = vault.decrypt(secret_encrypted)?;

    let http = reqwest::Client::new();
    let token = refresh_access_token(
        &http,
        provider.token_url(),
        &refresh_token,
        &client_id,
        &client_secret,
    )
    .await?;

    let expiry = token.expiry(Utc::now());
    let access_encrypted = vault.encrypt(&token.access_token)?;
    account_repo::store_access_token(db, account.id, access_encrypted, expiry)
        .await
        .map_err(|e| SourceError::OAuth(format!("failed to persist refreshed token: {}", e)))?;

    info!(
        "Refreshed OAuth2 access token for account '{}' (expires {})",
        account.name, expiry
    );

    Ok(SecretString::from(token.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_for_account_type() {
        assert_eq!(
            OAuthProvider::for_account_type("gmail"),
            Some(OAuthProvider::Gmail)
        );
        assert_eq!(
            OAuthProvider::for_account_type("o365"),
            Some(OAuthProvider::Microsoft)
        );
        assert_eq!(OAuthProvider::for_account_type("imap"), None);
    }

    #[test]
    fn test_token_urls() {
        assert!(OAuthProvider::Gmail.token_url().contains("googleapis.com"));
        assert!(OAuthProvider::Microsoft
            .token_url()
            .contains("microsoftonline.com"));
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();

        // Missing expiry means never validated: refresh.
        assert!(needs_refresh(None, now));
        // Expired and inside-the-buffer tokens refresh.
        assert!(needs_refresh(Some(now - Duration::hours(1)), now));
        assert!(needs_refresh(Some(now + Duration::seconds(30)), now));
        // Comfortably valid token is reused.
        assert!(!needs_refresh(Some(now + Duration::hours(1)), now));
    }

    #[test]
    fn test_token_response_expiry() {
        let now = Utc::now();

        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc", "expires_in": 120}"#).unwrap();
        assert_eq!(token.expiry(now), now + Duration::seconds(120));

        let token: TokenResponse = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(
            token.expiry(now),
            now + Duration::seconds(DEFAULT_EXPIRES_IN as i64)
        );
    }

    #[test]
    fn test_sanitize_error_body() {
        let short = "invalid_grant";
        assert_eq!(sanitize_oauth_error_body(short), short);

        let long = "x".repeat(500);
        let sanitized = sanitize_oauth_error_body(&long);
        assert!(sanitized.len() < 250);
        assert!(sanitized.ends_with("(truncated)"));
    }

    #[tokio::test]
    async fn test_refresh_against_unreachable_endpoint() {
        let http = reqwest::Client::new();
        let result = refresh_access_token(
            &http,
            "http://127.0.0.1:1/token",
            &SecretString::from("refresh"),
            "client-id",
            &SecretString::from("secret"),
        )
        .await;
        assert!(matches!(result, Err(SourceError::OAuth(_))));
    }
}
