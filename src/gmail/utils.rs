//! Gmail utility functions
//!
//! Email creation, validation and encoding utilities.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{GmailMcpError, Result, ValidationError};

/// Validate an email address
pub fn validate_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty()
        && !domain.is_empty()
        && !local.contains(char::is_whitespace)
        && !domain.contains(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Encode text for a MIME header (RFC 2047, B encoding) when it is not plain ASCII
pub fn encode_mime_header(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    format!(
        "=?UTF-8?B?{}?=",
        base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
    )
}

/// Encode a raw email message for Gmail API (base64url, no padding)
pub fn encode_raw_message(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Parameters for a single outgoing email
#[derive(Debug, Clone)]
pub struct EmailParams {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    /// Comma-separated CC list, copied verbatim into the header
    pub cc: Option<String>,
}

/// Create the RFC 2822 text of an email
pub fn create_email_message(params: &EmailParams) -> Result<String> {
    if !validate_email(&params.to) {
        return Err(GmailMcpError::Validation(ValidationError::InvalidEmail {
            email: params.to.clone(),
        }));
    }

    reject_line_breaks("Subject", &params.subject)?;
    if let Some(cc) = params.cc.as_deref() {
        reject_line_breaks("Cc", cc)?;
    }

    let content_type = if params.is_html {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };

    let mut lines = vec![
        format!("To: {}", params.to),
        format!("Subject: {}", encode_mime_header(&params.subject)),
    ];

    if let Some(cc) = params.cc.as_deref().map(str::trim).filter(|cc| !cc.is_empty()) {
        lines.push(format!("Cc: {}", cc));
    }

    lines.push("MIME-Version: 1.0".to_string());
    lines.push(format!("Content-Type: {}", content_type));
    lines.push(String::new());
    lines.push(params.body.clone());

    Ok(lines.join("\r\n"))
}

/// Header values are single-line; a CR or LF would start a new header
fn reject_line_breaks(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(GmailMcpError::Validation(ValidationError::HeaderLineBreak {
            field: field.to_string(),
        }));
    }
    Ok(())
}
