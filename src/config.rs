//! Configuration management for the Gmail send MCP server
//!
//! Handles paths, environment variables, provider endpoints and timeouts.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, GmailMcpError, Result};

/// How OAuth client credentials reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CredentialsMode {
    /// Loaded once at startup from a credentials file or the environment
    Static,
    /// Supplied with every tool call
    #[default]
    PerRequest,
}

/// Configuration for the Gmail send MCP server
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the persisted token record
    pub token_path: PathBuf,

    /// Path to the Google client-secrets file (static mode)
    pub credentials_path: PathBuf,

    /// Credential sourcing policy
    pub credentials_mode: CredentialsMode,

    /// First port tried by the callback listener
    pub callback_port: u16,

    /// How long a callback listener waits for the redirect
    pub callback_timeout: Duration,

    /// Delay between a successful redirect and listener shutdown
    pub callback_shutdown_delay: Duration,

    /// Redirect URI used when the caller does not supply one
    pub default_redirect_uri: String,

    /// OAuth2 authorization endpoint
    pub auth_uri: String,

    /// OAuth2 token endpoint
    pub token_uri: String,

    /// Gmail REST API base URL
    pub gmail_api_base_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,
}

impl Config {
    /// Create a configuration from the environment, falling back to defaults
    pub fn new() -> Result<Self> {
        let token_path = std::env::var("GMAIL_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(google::DEFAULT_TOKEN_FILE));

        let credentials_path = match std::env::var("GMAIL_CREDENTIALS_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::get_config_dir()?.join("credentials.json"),
        };

        let callback_port = match std::env::var("GMAIL_OAUTH_PORT") {
            Ok(port) => port.parse().map_err(|_| {
                GmailMcpError::Config(ConfigError::InvalidConfig {
                    message: format!("GMAIL_OAUTH_PORT is not a port number: {}", port),
                })
            })?,
            Err(_) => google::CALLBACK_PORT,
        };

        Ok(Self {
            token_path,
            credentials_path,
            credentials_mode: CredentialsMode::default(),
            callback_port,
            callback_timeout: google::CALLBACK_TIMEOUT,
            callback_shutdown_delay: google::CALLBACK_SHUTDOWN_DELAY,
            default_redirect_uri: format!("http://localhost:{}{}", callback_port, google::CALLBACK_PATH),
            auth_uri: google::AUTH_URI.to_string(),
            token_uri: google::TOKEN_URI.to_string(),
            gmail_api_base_url: gmail::API_BASE_URL.to_string(),
            scopes: google::SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Get the configuration directory (not created; nothing is written there)
    fn get_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            GmailMcpError::Config(ConfigError::DirNotFound {
                path: "~".to_string(),
            })
        })?;

        Ok(home.join(".gmail-mcp"))
    }

    /// Check if the static credentials file exists
    pub fn credentials_file_exists(&self) -> bool {
        self.credentials_path.exists()
    }
}

/// Google OAuth2 constants
pub mod google {
    use std::time::Duration;

    pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
    pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
    pub const DEFAULT_TOKEN_FILE: &str = "token.json";
    pub const CALLBACK_PORT: u16 = 8080;
    pub const CALLBACK_PATH: &str = "/callback";
    pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const CALLBACK_SHUTDOWN_DELAY: Duration = Duration::from_secs(5);
    pub const SCOPES: [&str; 2] = [
        "https://www.googleapis.com/auth/gmail.send",
        "https://www.googleapis.com/auth/gmail.modify",
    ];
}

/// Gmail API constants
pub mod gmail {
    /// Base URL for Gmail API
    pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";
}
