//! OAuth authorization lifecycle for the Gmail API
//!
//! Decides whether the stored token is usable, refreshes it when it has
//! expired, and otherwise runs the loopback authorization flow:
//! - start a callback listener and hand back the consent URL at once
//! - wait for the redirect on a spawned task
//! - exchange the code with the same redirect URI and persist the tokens
//!
//! Progress of the spawned task is published as an [`AuthStatus`] on a
//! watch channel.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AuthError, GmailMcpError, Result};
use crate::gmail::callback::CallbackServer;
use crate::gmail::credentials::Credentials;
use crate::gmail::oauth::{GoogleOAuthClient, TokenExchange, TokenGrant};
use crate::gmail::token_store::{default_token_type, now_millis, TokenRecord, TokenStore};

/// Outcome of [`AuthManager::ensure_valid_token`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The token can be used right away
    Ready(TokenRecord),
    /// A human has to visit `auth_url`; completion happens in the background
    NeedsAuthorization { auth_url: String },
}

/// Consent URL together with the listener it redirects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUrl {
    pub auth_url: String,
    pub callback_url: String,
}

/// Progress of the background authorization flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// No flow has been started
    Idle,
    /// A listener is waiting for the redirect
    Pending { callback_url: String },
    /// Tokens were exchanged and saved
    Authorized,
    /// The last flow ended without tokens
    Failed { message: String },
}

/// Owns the token store view and the single live authorization flow.
///
/// Starting a new flow while one is pending aborts the old one; its
/// listener is dropped and only the newest consent URL can complete.
pub struct AuthManager {
    store: TokenStore,
    exchange: Arc<dyn TokenExchange>,
    callback_port: u16,
    callback_timeout: Duration,
    callback_shutdown_delay: Duration,

    /// Redirect URI bound for the pending flow, reused for the code exchange
    pending_redirect_uri: Mutex<Option<String>>,

    /// Task waiting for the redirect of the pending flow
    background: Mutex<Option<JoinHandle<()>>>,

    status: watch::Sender<AuthStatus>,
}

impl AuthManager {
    /// Create a manager talking to Google's endpoints
    pub fn from_config(config: &Config) -> Arc<Self> {
        Self::new(config, Arc::new(GoogleOAuthClient::new(config)))
    }

    /// Create a manager with an explicit token exchange
    pub fn new(config: &Config, exchange: Arc<dyn TokenExchange>) -> Arc<Self> {
        let (status, _) = watch::channel(AuthStatus::Idle);

        Arc::new(Self {
            store: TokenStore::new(config.token_path.clone()),
            exchange,
            callback_port: config.callback_port,
            callback_timeout: config.callback_timeout,
            callback_shutdown_delay: config.callback_shutdown_delay,
            pending_redirect_uri: Mutex::new(None),
            background: Mutex::new(None),
            status,
        })
    }

    /// Token store backing this manager
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Current state of the background flow
    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    /// Watch the background flow
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    /// Return a usable token, or start authorization and return its URL.
    ///
    /// Never waits for the human: a missing token, or an expired one that
    /// cannot be refreshed, yields `NeedsAuthorization` immediately.
    pub async fn ensure_valid_token(self: &Arc<Self>, credentials: &Credentials) -> Result<AuthDecision> {
        let Some(token) = self.store.load().await else {
            tracing::info!("No existing token found, starting authorization");
            return self.begin_authorization(credentials).await;
        };

        if !token.is_expired() {
            return Ok(AuthDecision::Ready(token));
        }

        tracing::info!("Existing token is expired, refreshing");
        match self.refresh_token(credentials).await {
            Ok(refreshed) => Ok(AuthDecision::Ready(refreshed)),
            Err(e) => {
                tracing::warn!("Failed to refresh token, need re-authentication: {}", e);
                self.begin_authorization(credentials).await
            }
        }
    }

    async fn begin_authorization(self: &Arc<Self>, credentials: &Credentials) -> Result<AuthDecision> {
        let AuthorizationUrl { auth_url, .. } = self.generate_auth_url(credentials).await?;
        Ok(AuthDecision::NeedsAuthorization { auth_url })
    }

    /// Refresh the stored token and persist the result.
    ///
    /// The previous refresh token is kept when the provider omits a new one.
    pub async fn refresh_token(&self, credentials: &Credentials) -> Result<TokenRecord> {
        let refresh_token = self
            .store
            .load()
            .await
            .and_then(|t| t.refresh_token)
            .filter(|t| !t.is_empty())
            .ok_or(GmailMcpError::Auth(AuthError::NoRefreshToken))?;

        let grant = self.exchange.refresh(credentials, &refresh_token).await?;
        let record = token_record(grant, Some(refresh_token), now_millis());

        self.store.save(&record).await?;
        tracing::info!("Access token refreshed");
        Ok(record)
    }

    /// Start a callback listener and build the consent URL pointing at it.
    ///
    /// The listener's bound URL is the redirect URI for both the consent
    /// request and the later code exchange. A task waiting for the redirect
    /// is spawned before this returns.
    pub async fn generate_auth_url(self: &Arc<Self>, credentials: &Credentials) -> Result<AuthorizationUrl> {
        if let Some(previous) = lock(&self.background).take() {
            tracing::warn!("Replacing pending authorization flow");
            previous.abort();
        }

        let mut server = CallbackServer::new(self.callback_port)
            .with_timeout(self.callback_timeout)
            .with_shutdown_delay(self.callback_shutdown_delay);
        let callback_url = server.start().await?;

        *lock(&self.pending_redirect_uri) = Some(callback_url.clone());
        let auth_url = self.exchange.authorization_url(credentials, &callback_url);
        tracing::info!("Auth URL generated with callback: {}", callback_url);

        self.status.send_replace(AuthStatus::Pending {
            callback_url: callback_url.clone(),
        });
        self.spawn_completion(server, credentials.clone(), callback_url.clone());

        Ok(AuthorizationUrl {
            auth_url,
            callback_url,
        })
    }

    fn spawn_completion(self: &Arc<Self>, server: CallbackServer, credentials: Credentials, redirect_uri: String) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            tracing::info!("Background auth handler started, waiting for callback...");
            match manager.complete_authorization(server, &credentials, &redirect_uri).await {
                Ok(_) => {
                    tracing::info!("Background authentication completed successfully");
                    manager.status.send_replace(AuthStatus::Authorized);
                }
                Err(e) => {
                    match &e {
                        GmailMcpError::Auth(auth) if auth.is_callback_outcome() => {
                            tracing::warn!("Authorization attempt ended: {}", auth)
                        }
                        _ => tracing::error!("Background authentication failed: {}", e),
                    }
                    manager.status.send_replace(AuthStatus::Failed {
                        message: e.to_string(),
                    });
                }
            }
        });

        // A concurrent call may have stored its task after our abort above
        if let Some(previous) = lock(&self.background).replace(task) {
            previous.abort();
        }
    }

    async fn complete_authorization(
        &self,
        mut server: CallbackServer,
        credentials: &Credentials,
        redirect_uri: &str,
    ) -> Result<TokenRecord> {
        let code = server.await_code().await;
        server.stop().await;

        let result = match code {
            Ok(code) => self.exchange_and_store(&code, credentials, redirect_uri).await,
            Err(e) => Err(e),
        };

        // Only clear the cache if no newer flow has replaced it
        let mut pending = lock(&self.pending_redirect_uri);
        if pending.as_deref() == Some(redirect_uri) {
            pending.take();
        }
        result
    }

    /// Exchange an authorization code and persist the resulting tokens.
    ///
    /// Uses the redirect URI cached by `generate_auth_url`, falling back to
    /// the client's configured one when no flow is pending.
    pub async fn handle_authorization_code(&self, code: &str, credentials: &Credentials) -> Result<TokenRecord> {
        let redirect_uri = lock(&self.pending_redirect_uri)
            .clone()
            .unwrap_or_else(|| credentials.redirect_uri.clone());

        let record = self.exchange_and_store(code, credentials, &redirect_uri).await?;
        lock(&self.pending_redirect_uri).take();
        Ok(record)
    }

    async fn exchange_and_store(
        &self,
        code: &str,
        credentials: &Credentials,
        redirect_uri: &str,
    ) -> Result<TokenRecord> {
        tracing::info!("Exchanging authorization code using redirect URI {}", redirect_uri);

        let grant = self.exchange.exchange_code(credentials, code, redirect_uri).await?;
        let previous_refresh = self.store.load().await.and_then(|t| t.refresh_token);
        let record = token_record(grant, previous_refresh, now_millis());

        self.store.save(&record).await?;
        tracing::info!(
            "Token stored (refresh token {})",
            if record.refresh_token.is_some() { "present" } else { "missing" }
        );
        Ok(record)
    }

    /// Wait until the pending flow finishes
    pub async fn wait_for_authorization(&self) -> Result<()> {
        let mut rx = self.status.subscribe();

        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                AuthStatus::Authorized => return Ok(()),
                AuthStatus::Failed { message } => {
                    return Err(AuthError::AuthorizationFailed { message }.into())
                }
                AuthStatus::Idle => return Err(AuthError::NoAuthorizationPending.into()),
                AuthStatus::Pending { .. } => {}
            }

            if rx.changed().await.is_err() {
                return Err(AuthError::NoAuthorizationPending.into());
            }
        }
    }
}

/// Build the persisted record from a grant.
///
/// `expires_in` is derived from the absolute expiry rather than copied
/// from the provider.
fn token_record(grant: TokenGrant, previous_refresh: Option<String>, now_ms: i64) -> TokenRecord {
    TokenRecord {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.or(previous_refresh),
        token_type: grant
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(default_token_type),
        expires_in: grant.expires_at.map(|at| (at - now_ms) / 1000),
        expires_at: grant.expires_at,
        scope: grant.scope,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
