//! Gmail Send MCP Server Library
//!
//! A Model Context Protocol (MCP) server that sends email through the Gmail API.
//! OAuth2 authorization runs as a loopback flow: the server hands out a consent
//! URL and a local listener captures the redirect in the background.

pub mod config;
pub mod error;
pub mod gmail;
pub mod mcp;

pub use config::{Config, CredentialsMode};
pub use error::{GmailMcpError, Result};
pub use gmail::auth::{AuthDecision, AuthManager, AuthStatus};
pub use gmail::client::GmailClient;
pub use gmail::credentials::{Credentials, CredentialsProvider};
