//! MCP Tool definitions and handlers
//!
//! Defines the `send_email` and `get_auth_url` tools and their implementations.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{GmailMcpError, McpError, ValidationError};
use crate::gmail::client::GmailClient;
use crate::gmail::credentials::{CredentialsProvider, SuppliedCredentials};
use crate::gmail::types::SendOutcome;
use crate::gmail::utils::EmailParams;
use crate::mcp::types::{CallToolResult, Tool};

/// OAuth client fields accepted by every tool
#[derive(Debug, Clone, Default, Deserialize, JsonSchema, Validate)]
pub struct CredentialArgs {
    /// Google OAuth2 Client ID from Google Cloud Console
    #[validate(length(min = 1, message = "Google Client ID is required"))]
    pub client_id: Option<String>,

    /// Google OAuth2 Client Secret from Google Cloud Console
    #[validate(length(min = 1, message = "Google Client Secret is required"))]
    pub client_secret: Option<String>,

    /// OAuth2 redirect URI (optional, defaults to http://localhost:8080/callback)
    pub redirect_uri: Option<String>,
}

impl CredentialArgs {
    fn supplied(&self) -> SuppliedCredentials {
        SuppliedCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
        }
    }
}

/// Arguments of `send_email`
#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct SendEmailArgs {
    /// Recipient email address
    #[validate(email(message = "Invalid email address"))]
    pub to: String,

    /// Email subject
    #[validate(length(min = 1, message = "Subject cannot be empty"))]
    pub subject: String,

    /// Email body content
    #[validate(length(min = 1, message = "Body cannot be empty"))]
    pub body: String,

    /// Whether the body is HTML format (default: false)
    #[serde(rename = "isHtml", default)]
    pub is_html: bool,

    /// Carbon copy (CC) email addresses, comma-separated for multiple recipients
    pub cc: Option<String>,

    #[serde(flatten)]
    #[validate]
    pub credentials: CredentialArgs,
}

/// Arguments of `get_auth_url`
#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct GetAuthUrlArgs {
    #[serde(flatten)]
    #[validate]
    pub credentials: CredentialArgs,
}

/// Tool handler
pub struct ToolHandler {
    gmail_client: Arc<GmailClient>,
    credentials: CredentialsProvider,
}

impl ToolHandler {
    /// Create a new tool handler
    pub fn new(gmail_client: Arc<GmailClient>, credentials: CredentialsProvider) -> Self {
        Self {
            gmail_client,
            credentials,
        }
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        let per_call = self.credentials.requires_per_call_credentials();
        vec![
            tool_def(
                "send_email",
                "Send an email via Gmail with optional CC support. If authentication is required, returns auth URL.",
                input_schema::<SendEmailArgs>(per_call),
            ),
            tool_def(
                "get_auth_url",
                "Get Google OAuth2 authentication URL with local callback server",
                input_schema::<GetAuthUrlArgs>(per_call),
            ),
        ]
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value) -> CallToolResult {
        match name {
            "send_email" => self.handle_send_email(args).await,
            "get_auth_url" => self.handle_get_auth_url(args).await,
            _ => CallToolResult::error(
                McpError::UnknownTool {
                    name: name.to_string(),
                }
                .to_string(),
            ),
        }
    }

    // ==================== Tool Handlers ====================

    async fn handle_send_email(&self, args: Value) -> CallToolResult {
        let args: SendEmailArgs = match parse_args(args) {
            Ok(a) => a,
            Err(result) => return result,
        };

        let credentials = match self.credentials.resolve(&args.credentials.supplied()) {
            Ok(c) => c,
            Err(e) => return CallToolResult::error(format!("Error: {}", e)),
        };

        let params = EmailParams {
            to: args.to,
            subject: args.subject,
            body: args.body,
            is_html: args.is_html,
            cc: args.cc,
        };

        match self.gmail_client.send_email(&credentials, &params).await {
            Ok(SendOutcome::Sent { message_id }) => CallToolResult::text(format!(
                "Email sent successfully! Message ID: {}",
                message_id.as_deref().unwrap_or("unknown")
            )),
            Ok(SendOutcome::AuthorizationRequired { auth_url }) => CallToolResult::text(format!(
                "Authentication required. Local callback server started. Please visit this URL to authenticate:\n{}\n\n\
The authorization will be handled automatically. After authentication, you can retry sending the email.",
                auth_url
            )),
            Err(e) => CallToolResult::error(format!("Error sending email: {}", e)),
        }
    }

    async fn handle_get_auth_url(&self, args: Value) -> CallToolResult {
        let args: GetAuthUrlArgs = match parse_args(args) {
            Ok(a) => a,
            Err(result) => return result,
        };

        let credentials = match self.credentials.resolve(&args.credentials.supplied()) {
            Ok(c) => c,
            Err(e) => return CallToolResult::error(format!("Error: {}", e)),
        };

        match self.gmail_client.auth().generate_auth_url(&credentials).await {
            Ok(urls) => CallToolResult::text(format!(
                "Local callback server started at {}. Please visit this URL to authenticate:\n{}\n\n\
The authorization will be handled automatically. Authentication process initiated in background.",
                urls.callback_url, urls.auth_url
            )),
            Err(e) => CallToolResult::error(format!("Error generating auth URL: {}", e)),
        }
    }
}

/// Deserialize and validate tool arguments, reporting every problem found
fn parse_args<T: DeserializeOwned + Validate>(args: Value) -> Result<T, CallToolResult> {
    let args = if args.is_null() { json!({}) } else { args };

    let parsed: T = serde_json::from_value(args)
        .map_err(|e| validation_failure(vec![e.to_string()]))?;

    parsed.validate().map_err(|errors| {
        let mut messages = Vec::new();
        collect_messages(&errors, &mut messages);
        validation_failure(messages)
    })?;

    Ok(parsed)
}

fn validation_failure(messages: Vec<String>) -> CallToolResult {
    CallToolResult::error(GmailMcpError::Validation(ValidationError::Fields { messages }).to_string())
}

fn collect_messages(errors: &ValidationErrors, messages: &mut Vec<String>) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(field, _)| **field);

    for (field, kind) in fields {
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    messages.push(
                        err.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("{} is invalid", field)),
                    );
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_messages(nested, messages),
            ValidationErrorsKind::List(items) => {
                for nested in items.values() {
                    collect_messages(nested, messages);
                }
            }
        }
    }
}

// ==================== Schema Definitions ====================

fn tool_def(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    }
}

/// JSON schema of an argument struct, with credentials required in per-call mode
fn input_schema<T: JsonSchema>(require_credentials: bool) -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({"type": "object"}));

    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");

        if require_credentials {
            let required = object
                .entry("required")
                .or_insert_with(|| json!([]));
            if let Some(required) = required.as_array_mut() {
                required.push(json!("client_id"));
                required.push(json!("client_secret"));
            }
        }
    }

    schema
}
