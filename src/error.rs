//! Error types for the Gmail send MCP server
//!
//! This module defines the error hierarchy for all operations in the server.

use thiserror::Error;

/// Main error type for the Gmail send MCP server
#[derive(Error, Debug)]
pub enum GmailMcpError {
    /// OAuth authorization lifecycle errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Gmail API errors
    #[error("Gmail API error: {0}")]
    Gmail(#[from] GmailApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// OAuth authorization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No redirect arrived before the callback window closed
    #[error("OAuth2 callback timeout: no redirect received within {seconds} seconds")]
    CallbackTimeout { seconds: u64 },

    /// The provider redirected back with an `error` parameter
    #[error("OAuth2 error: {error} - {description}")]
    ProviderError { error: String, description: String },

    #[error("Failed to start callback server. Tried ports {first} to {last}, all are in use")]
    PortsExhausted { first: u16, last: u16 },

    #[error("Callback server error: {message}")]
    CallbackServer { message: String },

    #[error("A caller is already waiting for this callback")]
    CallbackAlreadyAwaited,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Failed to refresh token: {message}")]
    TokenRefreshFailed { message: String },

    #[error("Failed to get access token: {message}")]
    TokenExchangeFailed { message: String },

    #[error("Authorization did not complete: {message}")]
    AuthorizationFailed { message: String },

    #[error("No authorization in progress")]
    NoAuthorizationPending,
}

impl AuthError {
    /// Whether this error ends an authorization attempt for good.
    ///
    /// Every callback outcome is terminal; retrying means starting a new flow.
    pub fn is_callback_outcome(&self) -> bool {
        matches!(
            self,
            AuthError::CallbackTimeout { .. } | AuthError::ProviderError { .. }
        )
    }
}

/// Gmail API errors
#[derive(Error, Debug)]
pub enum GmailApiError {
    #[error("API request failed: {message}")]
    RequestFailed { message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found: {path}")]
    DirNotFound { path: String },

    #[error("Google client credentials missing: provide client_id and client_secret")]
    MissingCredentials,

    #[error("Invalid credentials file {path}: expected 'installed' or 'web' credentials")]
    InvalidCredentialsFile { path: String },

    #[error("Credentials are fixed at startup; {field} must not be passed per call")]
    CredentialsMode { field: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("{field} must not contain line breaks")]
    HeaderLineBreak { field: String },

    #[error("{}", .messages.join(", "))]
    Fields { messages: Vec<String> },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

/// Result type alias for Gmail MCP operations
pub type Result<T> = std::result::Result<T, GmailMcpError>;
