//! Gmail Send MCP Server
//!
//! A Model Context Protocol (MCP) server that sends mail through Gmail.
//! Authorization uses the OAuth2 loopback flow with a local callback listener.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gmail_send_mcp::config::{Config, CredentialsMode};
use gmail_send_mcp::gmail::auth::{AuthDecision, AuthManager};
use gmail_send_mcp::gmail::client::GmailClient;
use gmail_send_mcp::gmail::credentials::{CredentialsProvider, SuppliedCredentials};
use gmail_send_mcp::mcp::server::McpServer;
use gmail_send_mcp::mcp::tools::ToolHandler;

/// Gmail Send MCP Server
#[derive(Parser)]
#[command(name = "gmail-send-mcp")]
#[command(author, version, about = "Gmail Send MCP Server - send email from MCP clients via Gmail")]
struct Cli {
    /// Where the OAuth token record is stored
    #[arg(long, global = true)]
    token_path: Option<PathBuf>,

    /// Google client-secrets file used in static credentials mode
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// First port tried by the OAuth callback listener
    #[arg(long, global = true)]
    callback_port: Option<u16>,

    /// How OAuth client credentials are supplied
    #[arg(long, value_enum, global = true)]
    credentials_mode: Option<CredentialsMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize Gmail access in a browser and store the token
    Auth {
        /// Print the consent URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.token_path {
            config.token_path = path.clone();
        }
        if let Some(path) = &self.credentials {
            config.credentials_path = path.clone();
        }
        if let Some(port) = self.callback_port {
            config.callback_port = port;
            config.default_redirect_uri = gmail_send_mcp::gmail::callback::callback_url(port);
        }
        if let Some(mode) = self.credentials_mode {
            config.credentials_mode = mode;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::new().context("failed to load configuration")?;
    cli.apply(&mut config);

    match cli.command {
        Some(Commands::Auth { no_browser }) => {
            // The interactive flow always uses one fixed client
            config.credentials_mode = CredentialsMode::Static;
            authenticate(config, no_browser).await
        }
        None => run_server(config).await,
    }
}

async fn authenticate(config: Config, no_browser: bool) -> anyhow::Result<()> {
    let credentials = CredentialsProvider::from_config(&config)
        .and_then(|provider| provider.resolve(&SuppliedCredentials::default()))
        .context("static credentials are required for the auth command")?;

    let auth = AuthManager::from_config(&config);
    match auth.ensure_valid_token(&credentials).await? {
        AuthDecision::Ready(_) => {
            eprintln!("Already authorized; token stored at {}", auth.store().path().display());
            return Ok(());
        }
        AuthDecision::NeedsAuthorization { auth_url } => {
            eprintln!("Please visit this URL to authorize Gmail access:\n{}", auth_url);
            if !no_browser {
                if let Err(e) = open::that(&auth_url) {
                    tracing::warn!("Could not open a browser: {}", e);
                }
            }
        }
    }

    auth.wait_for_authorization()
        .await
        .context("authorization did not complete")?;
    eprintln!("Authentication completed successfully!");
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let credentials = CredentialsProvider::from_config(&config)
        .context("failed to load OAuth client credentials")?;
    tracing::info!(
        "Starting Gmail send MCP server (per-call credentials: {})",
        credentials.requires_per_call_credentials()
    );

    let auth = AuthManager::from_config(&config);
    let gmail_client = Arc::new(GmailClient::new(&config, auth));

    let mut server = McpServer::new(ToolHandler::new(gmail_client, credentials));
    server.run_stdio().await?;

    Ok(())
}
