//! Loopback listener for the OAuth2 redirect
//!
//! Binds a short-lived local HTTP server, captures the `code` (or `error`)
//! the provider appends to the redirect and hands it to a single waiter.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::google::{CALLBACK_PATH, CALLBACK_SHUTDOWN_DELAY, CALLBACK_TIMEOUT};
use crate::error::{AuthError, GmailMcpError, Result};

/// Number of consecutive ports tried before giving up
pub const MAX_PORT_ATTEMPTS: u16 = 10;

/// Upper bound on waiting for the server task after shutdown is signalled
const STOP_GRACE: Duration = Duration::from_secs(2);

type CallbackOutcome = std::result::Result<String, AuthError>;

/// State shared with the request handlers
#[derive(Clone)]
struct CallbackState {
    outcome: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_delay: Duration,
}

impl CallbackState {
    fn deliver(&self, outcome: CallbackOutcome) {
        let sender = self.outcome.lock().ok().and_then(|mut slot| slot.take());
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::warn!("Callback received but the waiter has gone away");
                }
            }
            None => tracing::warn!("Callback already delivered, ignoring repeat redirect"),
        }
    }
}

/// Transient OAuth2 redirect listener
pub struct CallbackServer {
    preferred_port: u16,
    timeout: Duration,
    shutdown_delay: Duration,
    port: Option<u16>,
    receiver: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Create a listener that will start probing at `preferred_port`
    pub fn new(preferred_port: u16) -> Self {
        Self {
            preferred_port,
            timeout: CALLBACK_TIMEOUT,
            shutdown_delay: CALLBACK_SHUTDOWN_DELAY,
            port: None,
            receiver: None,
            shutdown: Arc::new(watch::channel(false).0),
            task: None,
        }
    }

    /// Override how long `await_code` waits for the redirect
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the delay between a successful redirect and shutdown
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    /// Port actually bound, once started
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Bind the listener and return the callback URL.
    ///
    /// The port is held on both `127.0.0.1` and `::1` (when the host has
    /// IPv6) since `localhost` may resolve to either. A port occupied on
    /// either address moves the search to the next one, up to
    /// `MAX_PORT_ATTEMPTS` ports; any other bind error is returned as is.
    pub async fn start(&mut self) -> Result<String> {
        let (listener, listener_v6) = bind_with_fallback(self.preferred_port).await?;
        let port = listener.local_addr()?.port();

        let (tx, rx) = oneshot::channel();
        let state = CallbackState {
            outcome: Arc::new(Mutex::new(Some(tx))),
            shutdown: self.shutdown.clone(),
            shutdown_delay: self.shutdown_delay,
        };

        let app = callback_router(state);
        let v4 = axum::serve(listener, app.clone())
            .with_graceful_shutdown(shutdown_signal(self.shutdown.subscribe()))
            .into_future();
        let v6 = listener_v6.map(|listener| {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(self.shutdown.subscribe()))
                .into_future()
        });

        let task = tokio::spawn(async move {
            let results = match v6 {
                Some(v6) => {
                    let (a, b) = tokio::join!(v4, v6);
                    vec![a, b]
                }
                None => vec![v4.await],
            };
            for result in results {
                if let Err(e) = result {
                    tracing::error!("Callback server terminated: {}", e);
                }
            }
            tracing::debug!("Callback server on port {} stopped", port);
        });

        self.port = Some(port);
        self.receiver = Some(rx);
        self.task = Some(task);

        let callback_url = callback_url(port);
        tracing::info!("OAuth2 callback server listening, callback URL: {}", callback_url);
        Ok(callback_url)
    }

    /// Wait for the redirect and return its authorization code.
    ///
    /// Only one wait is allowed per listener; a second call fails with
    /// `CallbackAlreadyAwaited`.
    pub async fn await_code(&mut self) -> Result<String> {
        if self.task.is_none() && self.receiver.is_none() {
            return Err(AuthError::CallbackServer {
                message: "callback server not started".to_string(),
            }
            .into());
        }

        let receiver = self
            .receiver
            .take()
            .ok_or(GmailMcpError::Auth(AuthError::CallbackAlreadyAwaited))?;

        match tokio::time::timeout(self.timeout, receiver).await {
            Err(_) => Err(AuthError::CallbackTimeout {
                seconds: self.timeout.as_secs(),
            }
            .into()),
            Ok(Err(_)) => Err(AuthError::CallbackServer {
                message: "callback server stopped before a redirect arrived".to_string(),
            }
            .into()),
            Ok(Ok(outcome)) => outcome.map_err(GmailMcpError::Auth),
        }
    }

    /// Shut the listener down and release its socket
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.port = None;
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Loopback callback URL for a bound port
pub fn callback_url(port: u16) -> String {
    format!("http://localhost:{}{}", port, CALLBACK_PATH)
}

/// Resolves once `stop` (or a delivered code) flips the shutdown flag
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn bind_with_fallback(preferred_port: u16) -> Result<(TcpListener, Option<TcpListener>)> {
    let mut last = preferred_port;

    for offset in 0..MAX_PORT_ATTEMPTS {
        // Port 0 lets the OS pick; a conflict on ::1 just means asking again
        let port = if preferred_port == 0 {
            0
        } else {
            match preferred_port.checked_add(offset) {
                Some(port) => port,
                None => break,
            }
        };
        last = port;

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!("Port {} is in use, trying port {}...", port, port.saturating_add(1));
                continue;
            }
            Err(e) => return Err(bind_error(port, e)),
        };
        let bound = listener.local_addr()?.port();

        match TcpListener::bind((Ipv6Addr::LOCALHOST, bound)).await {
            Ok(listener_v6) => return Ok((listener, Some(listener_v6))),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!("Port {} is in use on [::1], trying port {}...", bound, bound.saturating_add(1));
            }
            Err(e) => {
                tracing::debug!("IPv6 loopback unavailable ({}), listening on 127.0.0.1 only", e);
                return Ok((listener, None));
            }
        }
    }

    Err(AuthError::PortsExhausted {
        first: preferred_port,
        last,
    }
    .into())
}

fn bind_error(port: u16, e: std::io::Error) -> GmailMcpError {
    AuthError::CallbackServer {
        message: format!("failed to bind port {}: {}", port, e),
    }
    .into()
}

fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .fallback(handle_other)
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let param = |name: &str| params.get(name).filter(|v| !v.is_empty());

    if let Some(error) = param("error") {
        let description = params
            .get("error_description")
            .cloned()
            .unwrap_or_else(|| "No description provided".to_string());
        tracing::warn!("OAuth error received: {} ({})", error, description);

        let page = failure_page(error, &description);
        state.deliver(Err(AuthError::ProviderError {
            error: error.clone(),
            description,
        }));
        return (StatusCode::BAD_REQUEST, Html(page));
    }

    if let Some(code) = param("code") {
        tracing::info!("Authorization code received (length {})", code.len());
        state.deliver(Ok(code.clone()));

        let shutdown = state.shutdown.clone();
        let delay = state.shutdown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shutdown.send_replace(true);
        });

        return (StatusCode::OK, Html(SUCCESS_PAGE.to_string()));
    }

    tracing::debug!("Callback request carried neither code nor error");
    (StatusCode::NOT_FOUND, Html(WAITING_PAGE.to_string()))
}

async fn handle_other() -> (StatusCode, Html<String>) {
    (StatusCode::NOT_FOUND, Html(WAITING_PAGE.to_string()))
}

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication Successful!</h1>\
<p>Authorization code received. You can close this window.</p>\
<script>setTimeout(() => { window.close(); }, 3000);</script></body></html>";

const WAITING_PAGE: &str =
    "<html><body><h1>OAuth2 Callback Server</h1><p>Waiting for authentication callback...</p></body></html>";

fn failure_page(error: &str, description: &str) -> String {
    format!(
        "<html><body><h1>Authentication Failed</h1><p>Error: {}</p><p>Description: {}</p>\
<p>You can close this window.</p></body></html>",
        escape_html(error),
        escape_html(description)
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
