//! OAuth client credentials and the policy for sourcing them

use std::path::Path;

use serde::Deserialize;

use crate::config::{Config, CredentialsMode};
use crate::error::{ConfigError, GmailMcpError, Result};

/// OAuth2 client identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Credentials as they arrive with a tool call
#[derive(Debug, Clone, Default)]
pub struct SuppliedCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

impl SuppliedCredentials {
    fn is_empty(&self) -> bool {
        self.client_id.is_none() && self.client_secret.is_none() && self.redirect_uri.is_none()
    }
}

/// Client section of a Google client-secrets file
#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Google client-secrets file ("web" or "installed" application)
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    web: Option<ClientSecrets>,
    installed: Option<ClientSecrets>,
}

/// Where OAuth client credentials come from, fixed at construction
#[derive(Debug, Clone)]
pub enum CredentialsProvider {
    /// One client for the lifetime of the process
    Static(Credentials),
    /// Each call names its own client
    PerRequest { default_redirect_uri: String },
}

impl CredentialsProvider {
    /// Build the provider selected by `config.credentials_mode`
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.credentials_mode {
            CredentialsMode::PerRequest => Ok(CredentialsProvider::PerRequest {
                default_redirect_uri: config.default_redirect_uri.clone(),
            }),
            CredentialsMode::Static => {
                let credentials = load_static(config, |key| std::env::var(key).ok())?;
                Ok(CredentialsProvider::Static(credentials))
            }
        }
    }

    /// Whether tool calls must carry `client_id` and `client_secret`
    pub fn requires_per_call_credentials(&self) -> bool {
        matches!(self, CredentialsProvider::PerRequest { .. })
    }

    /// Effective credentials for one call
    pub fn resolve(&self, supplied: &SuppliedCredentials) -> Result<Credentials> {
        match self {
            CredentialsProvider::Static(credentials) => {
                if !supplied.is_empty() {
                    let field = if supplied.client_id.is_some() {
                        "client_id"
                    } else if supplied.client_secret.is_some() {
                        "client_secret"
                    } else {
                        "redirect_uri"
                    };
                    return Err(GmailMcpError::Config(ConfigError::CredentialsMode {
                        field: field.to_string(),
                    }));
                }
                Ok(credentials.clone())
            }
            CredentialsProvider::PerRequest {
                default_redirect_uri,
            } => {
                let client_id = non_blank(supplied.client_id.as_deref());
                let client_secret = non_blank(supplied.client_secret.as_deref());
                let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
                    return Err(GmailMcpError::Config(ConfigError::MissingCredentials));
                };

                Ok(Credentials {
                    client_id: client_id.to_string(),
                    client_secret: client_secret.to_string(),
                    redirect_uri: non_blank(supplied.redirect_uri.as_deref())
                        .unwrap_or(default_redirect_uri)
                        .to_string(),
                })
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Load static credentials: the client-secrets file first, then the environment.
///
/// An unreadable or malformed file falls back to the environment as well.
fn load_static(config: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
    if config.credentials_file_exists() {
        match load_client_secrets(&config.credentials_path, &config.default_redirect_uri) {
            Ok(credentials) => return Ok(credentials),
            Err(e) => tracing::warn!(
                "Could not use credentials file {} ({}), using environment variables",
                config.credentials_path.display(),
                e
            ),
        }
    } else {
        tracing::warn!(
            "Credentials file {} not found, using environment variables",
            config.credentials_path.display()
        );
    }

    credentials_from_env(&config.default_redirect_uri, env)
}

fn load_client_secrets(path: &Path, default_redirect_uri: &str) -> Result<Credentials> {
    let content = std::fs::read_to_string(path)?;
    let file: ClientSecretsFile = serde_json::from_str(&content)?;

    let secrets = file.web.or(file.installed).ok_or_else(|| {
        GmailMcpError::Config(ConfigError::InvalidCredentialsFile {
            path: path.display().to_string(),
        })
    })?;

    let redirect_uri = secrets
        .redirect_uris
        .into_iter()
        .next()
        .unwrap_or_else(|| default_redirect_uri.to_string());

    Ok(Credentials {
        client_id: secrets.client_id,
        client_secret: secrets.client_secret,
        redirect_uri,
    })
}

fn credentials_from_env(
    default_redirect_uri: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials> {
    let client_id = env("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty());
    let client_secret = env("GOOGLE_CLIENT_SECRET").filter(|v| !v.is_empty());

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Ok(Credentials {
            client_id,
            client_secret,
            redirect_uri: env("GOOGLE_REDIRECT_URI")
                .unwrap_or_else(|| default_redirect_uri.to_string()),
        }),
        _ => Err(GmailMcpError::Config(ConfigError::MissingCredentials)),
    }
}
