//! Gmail API client
//!
//! Sends mail through `users.messages.send` once the authorization
//! lifecycle has produced a usable token.

use std::sync::Arc;

use crate::config::gmail::USER_ID;
use crate::config::Config;
use crate::error::{GmailApiError, GmailMcpError, Result};
use crate::gmail::auth::{AuthDecision, AuthManager};
use crate::gmail::credentials::Credentials;
use crate::gmail::types::{SendMessageRequest, SendOutcome, SentMessage};
use crate::gmail::utils::{create_email_message, encode_raw_message, EmailParams};

/// Gmail API client
pub struct GmailClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// Authorization lifecycle
    auth: Arc<AuthManager>,

    /// Gmail REST API base URL
    api_base_url: String,
}

impl GmailClient {
    /// Create a new Gmail client
    pub fn new(config: &Config, auth: Arc<AuthManager>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            auth,
            api_base_url: config.gmail_api_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Authorization lifecycle used by this client
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    fn send_url(&self) -> String {
        format!("{}/users/{}/messages/send", self.api_base_url, USER_ID)
    }

    /// Send an email, or report the authorization URL when no token is usable
    pub async fn send_email(&self, credentials: &Credentials, params: &EmailParams) -> Result<SendOutcome> {
        let raw = encode_raw_message(&create_email_message(params)?);

        let token = match self.auth.ensure_valid_token(credentials).await? {
            AuthDecision::Ready(token) => token,
            AuthDecision::NeedsAuthorization { auth_url } => {
                return Ok(SendOutcome::AuthorizationRequired { auth_url })
            }
        };

        let response = self
            .http_client
            .post(self.send_url())
            .bearer_auth(&token.access_token)
            .json(&SendMessageRequest { raw })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let message: SentMessage = response.json().await?;
            tracing::info!("Email sent, message id {:?}", message.id);
            return Ok(SendOutcome::Sent {
                message_id: message.id,
            });
        }

        let text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || text.contains("invalid_grant") {
            tracing::warn!("Gmail rejected the access token ({}), re-authorizing", status);
            let urls = self.auth.generate_auth_url(credentials).await?;
            return Ok(SendOutcome::AuthorizationRequired {
                auth_url: urls.auth_url,
            });
        }

        Err(GmailMcpError::Gmail(GmailApiError::RequestFailed {
            message: format!("Failed to send email ({}): {}", status, text),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::token_store::{now_millis, TokenRecord};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:8080/callback".to_string(),
        }
    }

    fn params() -> EmailParams {
        EmailParams {
            to: "someone@example.com".to_string(),
            subject: "hello".to_string(),
            body: "body".to_string(),
            is_html: false,
            cc: None,
        }
    }

    async fn client_with_token(dir: &tempfile::TempDir, server: &MockServer) -> GmailClient {
        let mut config = Config::new().unwrap();
        config.token_path = dir.path().join("token.json");
        config.callback_port = 0;
        config.gmail_api_base_url = format!("{}/gmail/v1", server.uri());
        config.token_uri = format!("{}/token", server.uri());

        let auth = AuthManager::from_config(&config);
        auth.store()
            .save(&TokenRecord {
                access_token: "live-token".to_string(),
                refresh_token: Some("refresh".to_string()),
                token_type: "Bearer".to_string(),
                expires_in: Some(3600),
                expires_at: Some(now_millis() + 3_600_000),
                scope: None,
            })
            .await
            .unwrap();
        GmailClient::new(&config, auth)
    }

    #[tokio::test]
    async fn test_send_email_posts_raw_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(header("authorization", "Bearer live-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg-1",
                "threadId": "thread-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let client = client_with_token(&dir, &server).await;
        let outcome = client.send_email(&credentials(), &params()).await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Sent {
                message_id: Some("msg-1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_unauthorized_send_starts_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid Credentials"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let client = client_with_token(&dir, &server).await;
        let outcome = client.send_email(&credentials(), &params()).await.unwrap();

        assert!(matches!(outcome, SendOutcome::AuthorizationRequired { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let client = client_with_token(&dir, &server).await;
        let err = client.send_email(&credentials(), &params()).await.unwrap_err();

        assert!(err.to_string().contains("backend down"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected_before_auth() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let client = client_with_token(&dir, &server).await;

        let result = client
            .send_email(
                &credentials(),
                &EmailParams {
                    to: "not-an-address".to_string(),
                    ..params()
                },
            )
            .await;
        assert!(result.is_err());
    }
}
