//! Google OAuth2 token endpoint adapter
//!
//! Builds authorization URLs and performs the code-exchange and refresh
//! grants. The orchestrator only sees the `TokenExchange` trait so the
//! provider can be swapped out in tests.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AuthError, GmailMcpError, Result};
use crate::gmail::credentials::Credentials;
use crate::gmail::token_store::now_millis;

/// Tokens returned by a successful grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Absolute expiry in epoch milliseconds, computed when the response arrived
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

/// Raw token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_grant(self, received_at_ms: i64) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            token_type: self.token_type,
            expires_at: self.expires_in.map(|secs| received_at_ms + secs * 1000),
            scope: self.scope,
        }
    }
}

/// The three token-endpoint operations used by the authorization flow
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Consent URL sending the user back to `redirect_uri`
    fn authorization_url(&self, credentials: &Credentials, redirect_uri: &str) -> String;

    /// Trade a one-time authorization code for tokens
    async fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant>;

    /// Mint a new access token from a refresh token
    async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<TokenGrant>;
}

/// `TokenExchange` against Google's OAuth2 endpoints
pub struct GoogleOAuthClient {
    http_client: reqwest::Client,
    auth_uri: String,
    token_uri: String,
    scopes: Vec<String>,
}

impl GoogleOAuthClient {
    /// Create a client using the endpoints and scopes from `config`
    pub fn new(config: &Config) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            auth_uri: config.auth_uri.clone(),
            token_uri: config.token_uri.clone(),
            scopes: config.scopes.clone(),
        }
    }

    async fn post_token(
        &self,
        params: &[(&str, &str)],
        rejected: fn(String) -> AuthError,
    ) -> Result<TokenGrant> {
        let response = self
            .http_client
            .post(&self.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| GmailMcpError::Auth(rejected(format!("token request failed: {}", e))))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Auth(rejected(format!("{} {}", status, text))));
        }

        let received_at = now_millis();
        let token_response: TokenResponse = response.json().await.map_err(|e| {
            GmailMcpError::Auth(rejected(format!("unreadable token response: {}", e)))
        })?;
        Ok(token_response.into_grant(received_at))
    }
}

#[async_trait]
impl TokenExchange for GoogleOAuthClient {
    fn authorization_url(&self, credentials: &Credentials, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.auth_uri,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes)
        )
    }

    async fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        self.post_token(&params, |message| AuthError::TokenExchangeFailed { message })
            .await
    }

    async fn refresh(&self, credentials: &Credentials, refresh_token: &str) -> Result<TokenGrant> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        self.post_token(&params, |message| AuthError::TokenRefreshFailed { message })
            .await
    }
}
