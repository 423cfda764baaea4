//! Gmail API type definitions
//!
//! These types mirror the Gmail API requests and responses used for sending.

use serde::{Deserialize, Serialize};

/// Response of `users.messages.send`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    /// Message ID
    #[serde(default)]
    pub id: Option<String>,

    /// Thread ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Label IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
}

/// Request to send a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Raw RFC 2822 message (base64url encoded)
    pub raw: String,
}

/// Result of a send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Gmail accepted the message
    Sent { message_id: Option<String> },
    /// No usable token; the human has to visit `auth_url` first
    AuthorizationRequired { auth_url: String },
}
