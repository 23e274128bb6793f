// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use nokode::config::FallbackConfig;
use nokode::error::RetryClass;
use nokode::llm::llm_log::LlmLogger;
use nokode::llm::message::{ContentBlock, MessageContent};
use nokode::llm::mock_provider::{MockError, MockProvider, MockToolCall};
use nokode::llm::provider::LlmProvider;
use nokode::llm::providers::AnthropicProvider;
use nokode::llm::rate_limit::RateLimiter;
use nokode::llm::retry::RetryPolicy;
use nokode::llm::transport::Transport;
use nokode::orchestrator::Orchestrator;
use nokode::prompt::PromptBuilder;
use nokode::server::{router, AppState};
use nokode::tools::{Database, MemoryStore, QueryMode, ToolRegistry};

const TEMPLATE: &str = "{{METHOD}} {{PATH}}\nBODY={{BODY}}\nQUERY={{QUERY}}\nIP={{IP}}\n[{{MEMORY}}]";

struct Harness {
    _dir: TempDir,
    database: Arc<Database>,
    memory: Arc<MemoryStore>,
    state: Arc<AppState>,
}

fn harness(provider: Arc<dyn LlmProvider>, max_turns: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let prompt_path = dir.path().join("prompt.md");
    std::fs::write(&prompt_path, TEMPLATE).unwrap();

    let database = Arc::new(Database::open(&dir.path().join("database.db")).unwrap());
    let memory = Arc::new(MemoryStore::new(dir.path().join("memory.md")));
    let tools = Arc::new(ToolRegistry::with_builtins(
        Arc::clone(&database),
        Arc::clone(&memory),
    ));

    let state = AppState {
        orchestrator: Orchestrator::new(provider, tools).with_max_turns(max_turns),
        prompts: PromptBuilder::new(prompt_path, Arc::clone(&memory), Arc::clone(&database)),
        fallback: FallbackConfig::default(),
        timeout: Duration::from_secs(10),
        max_body_bytes: 1024 * 1024,
    };

    Harness {
        _dir: dir,
        database,
        memory,
        state: Arc::new(state),
    }
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
    router(Arc::clone(state)).oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn prompt_of(provider: &MockProvider, call: usize) -> String {
    let requests = provider.recorded_requests();
    requests[call].messages[0].text().unwrap_or_default()
}

fn fast_transport() -> Transport {
    Transport::with_client(
        reqwest::Client::new(),
        RetryPolicy {
            max_retries: 3,
            network_max_retries: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            rate_limit_base_delay: Duration::from_millis(20),
            rate_limit_multiplier: 3,
            jitter: 0.0,
        },
        Arc::new(RateLimiter::unlimited()),
        LlmLogger::disabled(),
    )
}

#[tokio::test]
async fn test_get_root_returns_model_html_verbatim() {
    let html = "<!DOCTYPE html><html><body><h1>Contacts</h1></body></html>";
    let provider = MockProvider::new().with_response(html);
    let h = harness(Arc::new(provider.clone()), 10);

    let response = send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.headers()["x-request-id"].len(), 9);
    assert_eq!(body_text(response).await, html);

    let prompt = prompt_of(&provider, 0);
    assert!(prompt.starts_with("GET /\nBODY=null\n"));
    assert!(prompt.ends_with("[]"));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_post_contacts_inserts_then_redirects() {
    let provider = MockProvider::new()
        .then_tool_calls(vec![MockToolCall::new(
            "toolu_insert",
            "database",
            json!({"query": "INSERT INTO contacts (name) VALUES (?)", "params": ["Alice"]}),
        )])
        .then_tool_calls(vec![MockToolCall::new(
            "toolu_respond",
            "webResponse",
            json!({"statusCode": 302, "headers": {"Location": "/contacts/1"}, "body": ""}),
        )]);
    let h = harness(Arc::new(provider.clone()), 10);
    let created = h
        .database
        .execute(
            "CREATE TABLE contacts (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)".to_string(),
            vec![],
            QueryMode::Exec,
        )
        .await;
    assert!(created.success);

    let response = send(
        &h.state,
        Request::builder()
            .method("POST")
            .uri("/contacts")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"Alice"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/contacts/1");
    assert_eq!(provider.call_count(), 2);

    let prompt = prompt_of(&provider, 0);
    assert!(prompt.contains(r#"BODY={"name":"Alice"}"#));
    assert!(prompt.contains("CREATE TABLE contacts"));

    let second = &provider.recorded_requests()[1];
    let last = second.messages.last().unwrap();
    let MessageContent::Blocks(blocks) = &last.content else {
        panic!("expected tool result blocks");
    };
    match &blocks[0] {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            assert_eq!(tool_use_id, "toolu_insert");
            let result: Value = serde_json::from_str(content).unwrap();
            assert_eq!(result["success"], true);
            assert_eq!(result["lastInsertRowid"], 1);
        }
        other => panic!("unexpected block {:?}", other),
    }

    let rows = h
        .database
        .execute("SELECT name FROM contacts".to_string(), vec![], QueryMode::Query)
        .await;
    assert_eq!(rows.rows.unwrap()[0]["name"], "Alice");
}

#[tokio::test]
async fn test_rate_limited_vendor_eventually_answers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "<html><body>finally</body></html>"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = fast_transport();
    let expected: Duration = transport
        .retry_policy()
        .schedule(RetryClass::RateLimited { retry_after: None }, 3)
        .iter()
        .sum();
    let provider = AnthropicProvider::new(transport, "k", "claude-3-haiku-20240307")
        .with_base_url(server.uri());
    let h = harness(Arc::new(provider), 10);

    let started = Instant::now();
    let response = send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;

    assert!(started.elapsed() >= expected);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<html><body>finally</body></html>");
}

#[tokio::test]
async fn test_bad_request_from_vendor_is_500_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("malformed tools"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(fast_transport(), "k", "claude-3-haiku-20240307")
        .with_base_url(server.uri());
    let h = harness(Arc::new(provider), 10);

    let response = send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let request_id = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body = body_text(response).await;
    assert!(body.contains("<h1>Server Error</h1>"));
    assert!(body.contains(&format!("<strong>Request ID:</strong> {}", request_id)));
    assert!(body.contains("malformed tools"));
}

#[tokio::test]
async fn test_loop_exceeded_is_500() {
    let provider = MockProvider::new().then_tool_calls(vec![MockToolCall::new(
        "toolu_again",
        "database",
        json!({"query": "SELECT 1 AS one"}),
    )]);
    let h = harness(Arc::new(provider.clone()), 3);

    let response = send(
        &h.state,
        Request::builder().uri("/loop").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("exceeded 3 turns"));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn test_memory_update_visible_to_next_request() {
    let provider = MockProvider::new()
        .then_tool_calls(vec![MockToolCall::new(
            "toolu_mem",
            "updateMemory",
            json!({"content": "visitor likes dark mode", "mode": "append"}),
        )])
        .then_text("<html>noted</html>");
    let h = harness(Arc::new(provider.clone()), 10);

    let first = send(
        &h.state,
        Request::builder().uri("/prefs").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(h.memory.load().await, "visitor likes dark mode");

    send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;
    let prompt = prompt_of(&provider, 2);
    assert!(prompt.contains("[visitor likes dark mode"));
}

#[tokio::test]
async fn test_json_text_response_and_form_body() {
    let provider = MockProvider::new().with_response(
        "```json\n{\"statusCode\": 201, \"contentType\": \"application/json\", \"body\": \"{\\\"ok\\\":true}\"}\n```",
    );
    let h = harness(Arc::new(provider.clone()), 10);

    let response = send(
        &h.state,
        Request::builder()
            .method("PUT")
            .uri("/items?tag=a&tag=b")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::from("name=Bob&age=42"))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(body_text(response).await, r#"{"ok":true}"#);

    let prompt = prompt_of(&provider, 0);
    assert!(prompt.starts_with("PUT /items\n"));
    assert!(prompt.contains(r#"QUERY={"tag":["a","b"]}"#));
    assert!(prompt.contains("IP=203.0.113.9"));
    assert!(prompt.contains(r#""name":"Bob""#));
}

#[tokio::test]
async fn test_empty_model_output_uses_fallback() {
    let provider = MockProvider::new();
    let h = harness(Arc::new(provider), 10);

    let response = send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;

    let fallback = FallbackConfig::default();
    assert_eq!(response.status().as_u16(), fallback.status);
    assert_eq!(body_text(response).await, fallback.body);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let provider = MockProvider::new().with_response("<html></html>");
    let mut h = harness(Arc::new(provider.clone()), 10);
    Arc::get_mut(&mut h.state).unwrap().max_body_bytes = 8;

    let response = send(
        &h.state,
        Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("this body is too long"))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_broken_body_stream_is_400() {
    let provider = MockProvider::new().with_response("<html></html>");
    let h = harness(Arc::new(provider.clone()), 10);

    let chunks: Vec<std::io::Result<axum::body::Bytes>> = vec![
        Ok(axum::body::Bytes::from_static(b"name=")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let response = send(
        &h.state,
        Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("client went away"));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_vendor_network_failure_is_500() {
    let provider = MockProvider::new().then_error(MockError::Network("connection refused".to_string()));
    let h = harness(Arc::new(provider), 10);

    let response = send(
        &h.state,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("connection refused"));
}
