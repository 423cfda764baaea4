//! Durable storage for the current OAuth token set
//!
//! A single JSON record on disk, replaced wholesale on every save.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Safety margin subtracted from `expires_at` before a token counts as usable
pub const EXPIRY_MARGIN_MS: i64 = 60_000;

/// Persisted token set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Access token
    pub access_token: String,

    /// Refresh token (Google only returns it on first consent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Seconds left at the time the record was written, derived from `expires_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// Absolute expiry (Unix epoch milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub(crate) fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Whether the token must be refreshed before use.
    ///
    /// A record without `expires_at` never expires.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Expiry check against an explicit clock reading
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => now_ms >= expires_at - EXPIRY_MARGIN_MS,
        }
    }
}

/// Current wall-clock time in Unix epoch milliseconds
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// File-backed token store
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record; a missing or unreadable record is `None`
    pub async fn load(&self) -> Option<TokenRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("No token at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring unparsable token at {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Overwrite the stored record, creating parent directories first
    pub async fn save(&self, record: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&self.path, content).await?;
        tracing::info!("Token saved to {}", self.path.display());
        Ok(())
    }
}
