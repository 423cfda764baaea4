//! Integration tests for the Gmail send MCP server
//!
//! These drive the MCP protocol handler end to end. Google's token endpoint
//! and the Gmail API are mocked with wiremock; the OAuth redirect is played
//! against the real loopback listener.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gmail_send_mcp::config::Config;
use gmail_send_mcp::gmail::auth::{AuthManager, AuthStatus};
use gmail_send_mcp::gmail::client::GmailClient;
use gmail_send_mcp::gmail::credentials::{Credentials, CredentialsProvider};
use gmail_send_mcp::gmail::token_store::{TokenRecord, TokenStore};
use gmail_send_mcp::mcp::server::McpServer;
use gmail_send_mcp::mcp::tools::ToolHandler;

/// Helper to create a JSON-RPC request line
fn make_request(id: i64, method: &str, params: Option<Value>) -> String {
    let mut request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if let Some(p) = params {
        request["params"] = p;
    }
    request.to_string()
}

fn call_tool(id: i64, name: &str, arguments: Value) -> String {
    make_request(id, "tools/call", Some(json!({ "name": name, "arguments": arguments })))
}

fn test_config(dir: &tempfile::TempDir, mock: Option<&MockServer>) -> Config {
    let mut config = Config::new().expect("config");
    config.token_path = dir.path().join("token.json");
    config.credentials_path = dir.path().join("credentials.json");
    config.callback_port = 0;
    config.callback_timeout = Duration::from_secs(10);
    config.callback_shutdown_delay = Duration::from_millis(50);
    if let Some(mock) = mock {
        config.token_uri = format!("{}/token", mock.uri());
        config.gmail_api_base_url = format!("{}/gmail/v1", mock.uri());
    }
    config
}

struct Harness {
    server: McpServer,
    auth: Arc<AuthManager>,
}

fn harness(config: &Config, provider: CredentialsProvider) -> Harness {
    let auth = AuthManager::from_config(config);
    let client = Arc::new(GmailClient::new(config, Arc::clone(&auth)));
    Harness {
        server: McpServer::new(ToolHandler::new(client, provider)),
        auth,
    }
}

fn per_request(config: &Config) -> CredentialsProvider {
    CredentialsProvider::PerRequest {
        default_redirect_uri: config.default_redirect_uri.clone(),
    }
}

async fn send(server: &mut McpServer, line: &str) -> Value {
    let response = server
        .handle_message(line)
        .await
        .expect("handled")
        .expect("response expected");
    serde_json::to_value(response).expect("serializable")
}

fn tool_text(response: &Value) -> String {
    response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn is_error(response: &Value) -> bool {
    response["result"]["isError"].as_bool().unwrap_or(false)
}

mod mcp_protocol_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_reports_tools_capability() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(
            &mut h.server,
            &make_request(
                1,
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": { "name": "test-client", "version": "1.0.0" },
                    "capabilities": {}
                })),
            ),
        )
        .await;

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert!(response["result"]["capabilities"]["tools"].is_object());
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let reply = h
            .server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{}}"#)
            .await
            .expect("handled");
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_ping_and_unknown_method() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let pong = send(&mut h.server, &make_request(7, "ping", None)).await;
        assert!(pong["result"].is_object());

        let unknown = send(&mut h.server, &make_request(8, "prompts/list", None)).await;
        assert_eq!(unknown["error"]["code"], -32601);
        assert_eq!(unknown["id"], 8);
    }

    #[tokio::test]
    async fn test_tools_list_requires_credentials_per_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(&mut h.server, &make_request(2, "tools/list", None)).await;
        let tools = response["result"]["tools"].as_array().expect("tools").clone();
        assert_eq!(tools.len(), 2);

        let send_email = tools.iter().find(|t| t["name"] == "send_email").expect("send_email");
        let required: Vec<&str> = send_email["inputSchema"]["required"]
            .as_array()
            .expect("required")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"to"));
        assert!(required.contains(&"client_id"));
        assert!(required.contains(&"client_secret"));
    }

    #[tokio::test]
    async fn test_tools_list_in_static_mode_omits_credential_requirement() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let provider = CredentialsProvider::Static(Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: config.default_redirect_uri.clone(),
        });
        let mut h = harness(&config, provider);

        let response = send(&mut h.server, &make_request(2, "tools/list", None)).await;
        let auth_tool = response["result"]["tools"]
            .as_array()
            .expect("tools")
            .iter()
            .find(|t| t["name"] == "get_auth_url")
            .cloned()
            .expect("get_auth_url");
        let required = auth_tool["inputSchema"]["required"].as_array().cloned().unwrap_or_default();
        assert!(!required.contains(&json!("client_id")));
    }
}

mod tool_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(&mut h.server, &call_tool(3, "search_emails", json!({}))).await;
        assert!(is_error(&response));
        assert!(tool_text(&response).contains("Unknown tool: search_emails"));
    }

    #[tokio::test]
    async fn test_send_email_validation_lists_all_problems() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(
            &mut h.server,
            &call_tool(
                4,
                "send_email",
                json!({
                    "to": "nobody",
                    "subject": "",
                    "body": "hello",
                    "client_id": "id",
                    "client_secret": ""
                }),
            ),
        )
        .await;

        assert!(is_error(&response));
        let text = tool_text(&response);
        assert!(text.starts_with("Validation error: "));
        assert!(text.contains("Invalid email address"));
        assert!(text.contains("Subject cannot be empty"));
        assert!(text.contains("Google Client Secret is required"));
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn test_missing_credentials_in_per_request_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(&mut h.server, &call_tool(5, "get_auth_url", json!({}))).await;
        assert!(is_error(&response));
        assert!(tool_text(&response).contains("client_id"));
        assert_eq!(h.auth.status(), AuthStatus::Idle);
    }

    #[tokio::test]
    async fn test_static_mode_rejects_per_call_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let provider = CredentialsProvider::Static(Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: config.default_redirect_uri.clone(),
        });
        let mut h = harness(&config, provider);

        let response = send(
            &mut h.server,
            &call_tool(6, "get_auth_url", json!({ "client_id": "other", "client_secret": "x" })),
        )
        .await;
        assert!(is_error(&response));
        assert!(tool_text(&response).contains("must not be passed per call"));
    }

    #[tokio::test]
    async fn test_send_email_rejects_header_line_breaks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, None);
        let mut h = harness(&config, per_request(&config));

        let response = send(
            &mut h.server,
            &call_tool(
                9,
                "send_email",
                json!({
                    "to": "a@example.com",
                    "subject": "Hi\r\nBcc: attacker@evil.test",
                    "body": "hello",
                    "cc": "c@example.com\r\nBcc: x@evil.test",
                    "client_id": "id",
                    "client_secret": "secret"
                }),
            ),
        )
        .await;

        assert!(is_error(&response));
        assert!(tool_text(&response).contains("must not contain line breaks"));
        assert_eq!(h.auth.status(), AuthStatus::Idle);
    }

    #[test]
    fn test_missing_token_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("absent.json"));
        assert!(tokio_test::block_on(store.load()).is_none());
    }
}

mod authorization_flow_tests {
    use super::*;

    fn credential_args() -> Value {
        json!({ "client_id": "client-123", "client_secret": "shh" })
    }

    /// Same listener, addressed by the IPv4 loopback it is bound to
    fn loopback(callback_url: &str) -> String {
        callback_url.replace("localhost", "127.0.0.1")
    }

    fn pending_callback(auth: &AuthManager) -> String {
        match auth.status() {
            AuthStatus::Pending { callback_url } => callback_url,
            other => panic!("expected a pending flow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_auth_url_then_redirect_then_send() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "refresh_token": "fresh-refresh",
                "token_type": "Bearer",
                "expires_in": 3599,
                "scope": "https://www.googleapis.com/auth/gmail.send"
            })))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(header("authorization", "Bearer fresh-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg-42",
                "threadId": "thr-1",
                "labelIds": ["SENT"]
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, Some(&mock));
        let mut h = harness(&config, per_request(&config));

        let response = send(&mut h.server, &call_tool(10, "get_auth_url", credential_args())).await;
        assert!(!is_error(&response), "{}", tool_text(&response));
        let text = tool_text(&response);
        assert!(text.contains("accounts.google.com"));
        assert!(text.contains("access_type=offline"));
        assert!(text.contains("prompt=consent"));

        let callback_url = pending_callback(&h.auth);
        assert!(text.contains(&callback_url));

        let page = reqwest::get(format!("{}?code=auth-code-1", loopback(&callback_url)))
            .await
            .expect("callback reachable");
        assert!(page.status().is_success());

        h.auth.wait_for_authorization().await.expect("authorized");

        let stored: TokenRecord = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("token.json")).expect("token file"),
        )
        .expect("token json");
        assert_eq!(stored.access_token, "fresh-access");
        assert_eq!(stored.refresh_token.as_deref(), Some("fresh-refresh"));
        assert!(stored.expires_at.is_some());

        let mut send_args = credential_args();
        send_args["to"] = json!("friend@example.com");
        send_args["subject"] = json!("Hello");
        send_args["body"] = json!("<p>Hi</p>");
        send_args["isHtml"] = json!(true);

        let response = send(&mut h.server, &call_tool(11, "send_email", send_args)).await;
        assert!(!is_error(&response), "{}", tool_text(&response));
        assert_eq!(tool_text(&response), "Email sent successfully! Message ID: msg-42");
    }

    #[tokio::test]
    async fn test_send_without_token_returns_auth_url() {
        let mock = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, Some(&mock));
        let mut h = harness(&config, per_request(&config));

        let mut args = credential_args();
        args["to"] = json!("friend@example.com");
        args["subject"] = json!("Hello");
        args["body"] = json!("Body");

        let response = send(&mut h.server, &call_tool(12, "send_email", args)).await;
        assert!(!is_error(&response));
        let text = tool_text(&response);
        assert!(text.starts_with("Authentication required."));
        assert!(text.contains("client_id=client-123"));
        assert!(matches!(h.auth.status(), AuthStatus::Pending { .. }));
    }

    #[tokio::test]
    async fn test_denied_consent_fails_the_flow() {
        let mock = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, Some(&mock));
        let mut h = harness(&config, per_request(&config));

        send(&mut h.server, &call_tool(13, "get_auth_url", credential_args())).await;
        let callback_url = pending_callback(&h.auth);

        let page = reqwest::get(format!(
            "{}?error=access_denied&error_description=User%20said%20no",
            loopback(&callback_url)
        ))
        .await
        .expect("callback reachable");
        assert_eq!(page.status(), reqwest::StatusCode::BAD_REQUEST);

        let err = h.auth.wait_for_authorization().await.unwrap_err();
        assert!(err.to_string().contains("access_denied - User said no"));
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn test_second_flow_replaces_first() {
        let mock = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir, Some(&mock));
        let mut h = harness(&config, per_request(&config));

        send(&mut h.server, &call_tool(14, "get_auth_url", credential_args())).await;
        let first = pending_callback(&h.auth);

        send(&mut h.server, &call_tool(15, "get_auth_url", credential_args())).await;
        let second = pending_callback(&h.auth);
        assert_ne!(first, second);

        // The first listener is gone once its task is aborted
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(reqwest::get(format!("{}?code=stale", loopback(&first))).await.is_err());
    }
}
